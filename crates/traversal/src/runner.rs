//! One scheduled traversal step for a target
//!
//! The runner wraps a driver with everything around a batch: the target's
//! schedule, host load limits, the persisted token and a wall-clock budget.
//! An overrunning batch is abandoned on its worker thread, never cancelled;
//! its progress is simply not persisted.

use crate::driver::{BatchOutcome, TraversalDriver};
use crate::error::TraversalError;
use crate::host_load::HostLoadManager;
use crossbeam_channel::RecvTimeoutError;
use journal::{Schedule, TraversalStateStore};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default wall-clock budget of one batch
pub const DEFAULT_BATCH_BUDGET: Duration = Duration::from_secs(5 * 60);

/// Why a step did no work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    OutsideWindow,
    Delayed,
    NoCapacity,
    Busy,
}

/// Result of one runner step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Skipped(SkipReason),
    /// Documents were delivered and the token persisted
    Delivered(BatchOutcome),
    /// Nothing to deliver; the target cools down for its retry delay
    Finished,
}

pub struct TraversalRunner {
    target: String,
    driver: Arc<Mutex<TraversalDriver>>,
    load: Arc<HostLoadManager>,
    state: Arc<dyn TraversalStateStore>,
    budget: Duration,
}

impl TraversalRunner {
    pub fn new(
        target: impl Into<String>,
        driver: TraversalDriver,
        load: Arc<HostLoadManager>,
        state: Arc<dyn TraversalStateStore>,
    ) -> Self {
        Self {
            target: target.into(),
            driver: Arc::new(Mutex::new(driver)),
            load,
            state,
            budget: DEFAULT_BATCH_BUDGET,
        }
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Schedule of the target, or the default one
    pub fn schedule(&self) -> Result<Schedule, TraversalError> {
        Ok(self
            .state
            .load_schedule(&self.target)?
            .unwrap_or_else(|| Schedule::new(self.target.clone(), self.load.default_load())))
    }

    /// Run at most one batch
    pub fn run_once(&self) -> Result<RunOutcome, TraversalError> {
        let schedule = self.schedule()?;
        self.load.set_load(&self.target, schedule.load_per_minute);

        if schedule.disabled {
            return Ok(RunOutcome::Skipped(SkipReason::Disabled));
        }
        if !schedule.is_active_now() {
            return Ok(RunOutcome::Skipped(SkipReason::OutsideWindow));
        }
        if self.load.should_delay(&self.target) {
            return Ok(RunOutcome::Skipped(SkipReason::Delayed));
        }

        let hint = self.load.determine_batch_hint(&self.target);
        if hint == 0 {
            debug!("Target '{}' has no capacity left this period", self.target);
            return Ok(RunOutcome::Skipped(SkipReason::NoCapacity));
        }

        let token = self.state.load_checkpoint(&self.target)?;
        let result = match self.run_batch_with_budget(token, hint) {
            Ok(Some(result)) => result,
            Ok(None) => return Ok(RunOutcome::Skipped(SkipReason::Busy)),
            Err(e) => {
                let backoff = self.load.record_failure(&self.target);
                warn!("Traversal of '{}' failed, backing off {:?}: {}", self.target, backoff, e);
                return Err(e);
            }
        };

        match result {
            Ok(outcome) => {
                self.load.record_delivered(&self.target, outcome.count);
                self.load.record_success(&self.target);
                if let Some(token) = &outcome.checkpoint {
                    self.state.store_checkpoint(&self.target, token)?;
                }

                if outcome.count + outcome.rejected == 0 {
                    let delay = Duration::from_millis(schedule.retry_delay_ms);
                    self.load.connector_finished_traversal(&self.target, delay);
                    info!("Traversal of '{}' caught up; next attempt in {:?}", self.target, delay);
                    Ok(RunOutcome::Finished)
                } else {
                    Ok(RunOutcome::Delivered(outcome))
                }
            }
            Err(e) => {
                if let TraversalError::ResourceExhausted {
                    delivered,
                    checkpoint,
                    ..
                } = &e
                {
                    self.load.record_delivered(&self.target, *delivered);
                    if let Some(token) = checkpoint {
                        self.state.store_checkpoint(&self.target, token)?;
                    }
                }
                let backoff = self.load.record_failure(&self.target);
                warn!("Traversal of '{}' failed, backing off {:?}: {}", self.target, backoff, e);
                Err(e)
            }
        }
    }

    /// Run the batch on a worker thread; `Ok(None)` if a previous batch is
    /// still holding the driver
    fn run_batch_with_budget(
        &self,
        token: Option<String>,
        hint: usize,
    ) -> Result<Option<Result<BatchOutcome, TraversalError>>, TraversalError> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let driver = Arc::clone(&self.driver);

        std::thread::Builder::new()
            .name(format!("traversal-{}", self.target))
            .spawn(move || {
                let Some(mut driver) = driver.try_lock() else {
                    let _ = tx.send(None);
                    return;
                };

                let result = match &token {
                    Some(token) => driver.resume_traversal(token),
                    None => driver.ensure_started(),
                }
                .and_then(|()| {
                    driver.set_batch_hint(hint);
                    driver.run_batch(hint)
                });
                let _ = tx.send(Some(result));
            })
            .map_err(|e| TraversalError::Worker(e.to_string()))?;

        match rx.recv_timeout(self.budget) {
            Ok(result) => {
                if result.is_none() {
                    warn!("Previous batch of '{}' is still running", self.target);
                }
                Ok(result)
            }
            Err(RecvTimeoutError::Timeout) => Err(TraversalError::BudgetExceeded(self.budget)),
            Err(RecvTimeoutError::Disconnected) => {
                Err(TraversalError::Worker("batch worker exited without a result".to_string()))
            }
        }
    }

    /// Stop the driver's monitors, waiting for any in-flight batch
    pub fn shutdown(&self) {
        self.driver.lock().stop();
    }
}
