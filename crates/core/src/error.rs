//! Error types for the snapshot engine

use std::path::PathBuf;

/// Result type for snapshot engine operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by the snapshot store, differencer and change codec
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt snapshot frame in {path} at byte {offset}: {reason}")]
    CorruptFrame {
        path: PathBuf,
        offset: u64,
        reason: String,
    },

    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    #[error("Snapshot is out of order: {previous:?} is followed by {next:?}")]
    OutOfOrder { previous: String, next: String },

    #[error("Unknown change kind '{0}' (no factory registered)")]
    UnknownKind(String),

    #[error("Malformed change handle: {0}")]
    MalformedHandle(String),
}

impl CoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error indicates damaged data rather than a transient failure
    ///
    /// Corruption is fatal to the owning monitor; everything else is retried
    /// at the next scan interval.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::CorruptFrame { .. }
                | Self::CorruptRecord(_)
                | Self::OutOfOrder { .. }
                | Self::UnknownKind(_)
                | Self::MalformedHandle(_)
        )
    }
}
