//! Change queue, checkpoint bookkeeping and traversal state
//!
//! This crate provides:
//! - Bounded FIFO change queue with deterministic wake-up on close
//! - Checkpoint coordinator (committed/guaranteed positions per monitor)
//! - Versioned global checkpoint tokens with legacy fallback
//! - Traversal state persistence (sled embedded DB)

pub mod coordinator;
pub mod queue;
pub mod state;
pub mod token;

// Re-exports
pub use coordinator::{
    CheckpointCoordinator, CoordinatorError, MonitorProgress, DEFAULT_MAX_QUEUE_SIZE,
};
pub use queue::{ChangeQueue, QueueError, QueuedChange};
pub use state::{HourWindow, MemoryStateStore, Schedule, SledStateStore, StateError, TraversalStateStore};
pub use token::{GlobalCheckpoint, TokenError};
