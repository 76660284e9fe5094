//! Repository monitors for changefeed
//!
//! This crate provides:
//! - Snapshot producers (directory walker, in-memory repository)
//! - Per-monitor snapshot directories with pruning
//! - Background scan loops that diff consecutive snapshots into changes
//! - The monitor manager (lifecycle, shared queue, checkpoint commits)

pub mod error;
pub mod exclude;
pub mod manager;
pub mod monitor;
pub mod producer;
pub mod snapshots;

// Re-exports
pub use error::{ManagerError, ManagerState, MonitorError};
pub use exclude::{ExcludeConfig, ExcludeRules};
pub use manager::{ManagerConfig, ManagerStatus, MonitorManager};
pub use monitor::{MonitorConfig, MonitorState, MonitorStatus};
pub use producer::{DirectoryProducer, MemoryProducer, RecordStream, SnapshotProducer};
pub use snapshots::SnapshotDir;
