//! Configuration for the `cf` feed
//!
//! Config is read from `~/.config/changefeed/config.toml` (Linux/macOS)
//! or `%APPDATA%\changefeed\config.toml` (Windows), unless `--config`
//! points elsewhere. A missing file yields the defaults, which watch
//! nothing until a `[[monitors]]` entry is added.

use anyhow::{Context, Result};
use journal::{HourWindow, Schedule};
use monitor::{ExcludeConfig, MonitorConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Whole `cf` configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Storage and queue settings
    pub feed: FeedConfig,

    /// Delivery target, rate and schedule
    pub traversal: TraversalConfig,

    /// Where delivered documents are written
    pub output: OutputConfig,

    /// Watched directories
    pub monitors: Vec<DirectoryMonitorConfig>,
}

/// Storage and queue configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Snapshots, lock file and traversal state (default: platform data dir)
    pub state_dir: PathBuf,

    /// Daily rolling log files go here when set
    pub log_dir: Option<PathBuf>,

    /// Bound on buffered changes (default: 1000)
    pub queue_capacity: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            log_dir: None,
            queue_capacity: journal::DEFAULT_MAX_QUEUE_SIZE,
        }
    }
}

/// Delivery configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraversalConfig {
    /// Name of the delivery target (default: "default")
    pub target: String,

    /// Maximum documents per minute (default: 600)
    pub load_per_minute: u32,

    /// Cooldown after the feed caught up, in seconds (default: 300)
    pub retry_delay_secs: u64,

    /// Upper bound on one batch (default: 100)
    pub batch_size: usize,

    /// Wall-clock budget of one batch, in seconds (default: 300)
    pub batch_budget_secs: u64,

    /// Pause between idle runner steps, in milliseconds (default: 1000)
    pub poll_interval_ms: u64,

    /// Suspend delivery entirely
    pub disabled: bool,

    /// Local hours during which delivery may run; empty means always
    pub windows: Vec<HourWindow>,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            target: "default".to_string(),
            load_per_minute: traversal::DEFAULT_LOAD_PER_MINUTE,
            retry_delay_secs: 300,
            batch_size: traversal::DEFAULT_BATCH_SIZE,
            batch_budget_secs: 300,
            poll_interval_ms: 1000,
            disabled: false,
            windows: Vec::new(),
        }
    }
}

impl TraversalConfig {
    /// Schedule stored for the target at startup
    pub fn schedule(&self) -> Schedule {
        let mut schedule = Schedule::new(self.target.clone(), self.load_per_minute);
        schedule.retry_delay_ms = self.retry_delay_secs * 1000;
        schedule.disabled = self.disabled;
        schedule.windows = self.windows.clone();
        schedule
    }

    pub fn batch_budget(&self) -> Duration {
        Duration::from_secs(self.batch_budget_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Output configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// JSON-lines file documents are appended to (default: stdout)
    pub path: Option<PathBuf>,
}

/// One watched directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryMonitorConfig {
    /// Monitor id; names its snapshot directory and appears in checkpoints
    pub id: String,

    /// Directory to scan
    pub root: PathBuf,

    /// Seconds between scans (default: 60)
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,

    /// Attach file contents up to this many bytes to each document
    #[serde(default)]
    pub payload_limit: Option<u64>,

    #[serde(default)]
    pub exclude: ExcludeConfig,
}

fn default_scan_interval() -> u64 {
    60
}

impl DirectoryMonitorConfig {
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig::new(self.id.clone())
            .with_scan_interval(Duration::from_secs(self.scan_interval_secs))
    }
}

impl SystemConfig {
    /// Reject values the feed cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.feed.queue_capacity == 0 {
            anyhow::bail!("feed.queue_capacity must be at least 1");
        }
        if self.traversal.target.trim().is_empty() {
            anyhow::bail!("traversal.target must not be empty");
        }
        if self.traversal.batch_size == 0 {
            anyhow::bail!("traversal.batch_size must be at least 1");
        }
        if self.traversal.batch_budget_secs == 0 {
            anyhow::bail!("traversal.batch_budget_secs must be at least 1");
        }
        for window in &self.traversal.windows {
            if window.start_hour > 23 || window.end_hour > 24 {
                anyhow::bail!(
                    "traversal.windows: {}-{} is not a valid hour range",
                    window.start_hour,
                    window.end_hour
                );
            }
        }

        let mut ids = HashSet::new();
        for monitor in &self.monitors {
            if !ids.insert(monitor.id.as_str()) {
                anyhow::bail!("Duplicate monitor id '{}'", monitor.id);
            }
            if monitor.scan_interval_secs == 0 {
                anyhow::bail!("monitor '{}': scan_interval_secs must be at least 1", monitor.id);
            }
        }
        Ok(())
    }
}

fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("changefeed"))
        .unwrap_or_else(|| PathBuf::from(".changefeed"))
}

/// Get the config directory path
pub fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        dirs::home_dir().map(|h| h.join(".config/changefeed"))
    }

    #[cfg(not(target_os = "macos"))]
    {
        dirs::config_dir().map(|c| c.join("changefeed"))
    }
}

/// Get the default config file path
pub fn config_file_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Load configuration from `path`, or from the default location
///
/// A missing default file yields the defaults; an explicit path must exist.
pub fn load(path: Option<&Path>) -> Result<SystemConfig> {
    let config_path = match path {
        Some(p) => p.to_path_buf(),
        None => match config_file_path() {
            Some(p) if p.exists() => p,
            _ => {
                tracing::debug!("No config file found, using defaults");
                return Ok(SystemConfig::default());
            }
        },
    };

    let content = fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read config at {}", config_path.display()))?;

    let config = parse(&content)
        .with_context(|| format!("Invalid config at {}", config_path.display()))?;

    tracing::debug!("Loaded config from {}", config_path.display());
    Ok(config)
}

/// Parse and validate TOML config content
pub fn parse(content: &str) -> Result<SystemConfig> {
    let config: SystemConfig = toml::from_str(content).context("Failed to parse config")?;
    config.validate()?;
    Ok(config)
}

/// Generate example config content for display
pub fn example_config() -> String {
    let mut config = SystemConfig::default();
    config.feed.log_dir = Some(config.feed.state_dir.join("logs"));
    config.traversal.windows = vec![HourWindow {
        start_hour: 22,
        end_hour: 6,
    }];
    config.monitors.push(DirectoryMonitorConfig {
        id: "docs".to_string(),
        root: PathBuf::from("/srv/docs"),
        scan_interval_secs: default_scan_interval(),
        payload_limit: Some(64 * 1024),
        exclude: ExcludeConfig {
            patterns: vec!["*.tmp".to_string(), "build/".to_string()],
            ..ExcludeConfig::default()
        },
    });

    let mut content = String::from("# Changefeed Configuration\n");
    content.push_str("# Location: ~/.config/changefeed/config.toml\n");
    content.push_str("#\n");
    content.push_str("# Every section is optional; omitted keys take the values shown.\n\n");
    content.push_str(&toml::to_string_pretty(&config).unwrap_or_default());
    content
}
