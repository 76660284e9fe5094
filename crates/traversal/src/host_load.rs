//! Per-target throughput throttling
//!
//! Each traversal target may receive at most `ceil(rate * period / 60s)`
//! documents per period. Periods roll over lazily on the next query, so an
//! idle target costs nothing. Cooldowns (after a finished traversal) and
//! failure backoff are tracked independently of the rate counters.

use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Length of one accounting period
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(60);

/// Upper bound on a single batch
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Rate of targets without a configured load
pub const DEFAULT_LOAD_PER_MINUTE: u32 = 600;

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
struct TargetLoad {
    load_per_minute: u32,
    period_start: Instant,
    delivered: u64,
    cooldown_until: Option<Instant>,
    failures: u32,
    backoff_until: Option<Instant>,
}

impl TargetLoad {
    fn new(load_per_minute: u32, now: Instant) -> Self {
        Self {
            load_per_minute,
            period_start: now,
            delivered: 0,
            cooldown_until: None,
            failures: 0,
            backoff_until: None,
        }
    }

    fn roll(&mut self, now: Instant, period: Duration) {
        if now.saturating_duration_since(self.period_start) >= period {
            self.period_start = now;
            self.delivered = 0;
        }
    }
}

/// Tracks delivered documents, cooldowns and backoff per target
pub struct HostLoadManager {
    period: Duration,
    batch_size: usize,
    default_load: u32,
    targets: DashMap<String, TargetLoad>,
}

impl HostLoadManager {
    pub fn new() -> Self {
        Self {
            period: DEFAULT_PERIOD,
            batch_size: DEFAULT_BATCH_SIZE,
            default_load: DEFAULT_LOAD_PER_MINUTE,
            targets: DashMap::new(),
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period.max(Duration::from_millis(1));
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_default_load(mut self, load_per_minute: u32) -> Self {
        self.default_load = load_per_minute;
        self
    }

    pub fn default_load(&self) -> u32 {
        self.default_load
    }

    /// Configure the rate of `target` (documents per minute)
    pub fn set_load(&self, target: &str, load_per_minute: u32) {
        let now = Instant::now();
        self.targets
            .entry(target.to_string())
            .or_insert_with(|| TargetLoad::new(load_per_minute, now))
            .load_per_minute = load_per_minute;
    }

    /// Documents allowed per period at `load_per_minute`
    pub fn max_per_period(&self, load_per_minute: u32) -> u64 {
        let numerator = load_per_minute as u128 * self.period.as_millis();
        numerator.div_ceil(60_000) as u64
    }

    /// Recommended size of the next batch for `target`
    pub fn determine_batch_hint(&self, target: &str) -> usize {
        self.determine_batch_hint_at(target, Instant::now())
    }

    pub fn determine_batch_hint_at(&self, target: &str, now: Instant) -> usize {
        let mut load = self.entry(target, now);
        load.roll(now, self.period);

        let allowed = self.max_per_period(load.load_per_minute);
        let remaining = allowed.saturating_sub(load.delivered);
        remaining.min(self.batch_size as u64) as usize
    }

    /// Count `count` documents against the current period of `target`
    pub fn record_delivered(&self, target: &str, count: usize) {
        self.record_delivered_at(target, count, Instant::now());
    }

    pub fn record_delivered_at(&self, target: &str, count: usize, now: Instant) {
        let mut load = self.entry(target, now);
        load.roll(now, self.period);
        load.delivered += count as u64;
    }

    pub fn delivered_this_period(&self, target: &str) -> u64 {
        self.targets.get(target).map(|l| l.delivered).unwrap_or(0)
    }

    /// A traversal of `target` found nothing to do; rest for `retry_delay`
    pub fn connector_finished_traversal(&self, target: &str, retry_delay: Duration) {
        self.connector_finished_traversal_at(target, retry_delay, Instant::now());
    }

    pub fn connector_finished_traversal_at(&self, target: &str, retry_delay: Duration, now: Instant) {
        debug!("Target '{}' cooling down for {:?}", target, retry_delay);
        self.entry(target, now).cooldown_until = Some(now + retry_delay);
    }

    /// Whether `target` is cooling down or backing off
    pub fn should_delay(&self, target: &str) -> bool {
        self.should_delay_at(target, Instant::now())
    }

    pub fn should_delay_at(&self, target: &str, now: Instant) -> bool {
        let Some(load) = self.targets.get(target) else {
            return false;
        };
        let cooling = load.cooldown_until.map(|t| now < t).unwrap_or(false);
        let backing_off = load.backoff_until.map(|t| now < t).unwrap_or(false);
        cooling || backing_off
    }

    /// Register a failed traversal; returns the backoff applied
    pub fn record_failure(&self, target: &str) -> Duration {
        self.record_failure_at(target, Instant::now())
    }

    pub fn record_failure_at(&self, target: &str, now: Instant) -> Duration {
        let mut load = self.entry(target, now);
        load.failures = load.failures.saturating_add(1);

        let exponent = (load.failures - 1).min(16);
        let backoff = BACKOFF_BASE.saturating_mul(1u32 << exponent).min(BACKOFF_MAX);
        load.backoff_until = Some(now + backoff);
        backoff
    }

    /// Clear failure backoff after a successful traversal
    pub fn record_success(&self, target: &str) {
        if let Some(mut load) = self.targets.get_mut(target) {
            load.failures = 0;
            load.backoff_until = None;
        }
    }

    fn entry(&self, target: &str, now: Instant) -> dashmap::mapref::one::RefMut<'_, String, TargetLoad> {
        self.targets
            .entry(target.to_string())
            .or_insert_with(|| TargetLoad::new(self.default_load, now))
    }
}

impl Default for HostLoadManager {
    fn default() -> Self {
        Self::new()
    }
}
