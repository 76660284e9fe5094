//! Error types for monitors and the monitor manager

use feed_core::CoreError;
use journal::CoordinatorError;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, MonitorError>;

/// Failure of one monitor scan cycle
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Snapshot producer failed: {0:#}")]
    Producer(anyhow::Error),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl MonitorError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Damaged snapshot data; the monitor cannot continue
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Core(e) if e.is_corruption())
    }

    /// Coordinator invariant broken; the whole manager must stop
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Coordinator(_))
    }
}

/// Lifecycle state of a [`MonitorManager`](crate::MonitorManager)
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Errors surfaced by the monitor manager
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("Invalid monitor configuration: {0}")]
    Config(String),

    #[error("Operation not allowed while the manager is {0:?}")]
    InvalidState(ManagerState),

    #[error("Checkpoints belong to an earlier run of the manager")]
    Stale,

    #[error("Manager stopped after a fatal fault: {0}")]
    Fatal(String),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error(transparent)]
    Monitor(#[from] MonitorError),
}
