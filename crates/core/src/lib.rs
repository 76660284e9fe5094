//! Snapshot diff engine for changefeed
//!
//! This crate provides:
//! - Content fingerprints (BLAKE3)
//! - Snapshot records and the sort/dedup stage
//! - Append-only snapshot store (length-prefixed frames)
//! - Merge-join snapshot differencer
//! - Changes, handle encoding and the per-kind factory registry

pub mod change;
pub mod checkpoint;
pub mod diff;
pub mod error;
pub mod fingerprint;
pub mod record;
pub mod store;

// Re-exports
pub use change::{
    Change, ChangeKind, DeleteHandle, DocumentHandle, HandleFactory, HandleRegistry, RecordHandle,
};
pub use checkpoint::MonitorCheckpoint;
pub use diff::{diff_snapshots, DiffEvent, Differencer};
pub use error::{CoreError, Result};
pub use fingerprint::Fingerprint;
pub use record::{sort_and_dedup, IdOrdering, SnapshotRecord};
pub use store::{SnapshotReader, SnapshotStore, SnapshotWriter};
