//! Rate-limited delivery of monitored changes
//!
//! This crate provides:
//! - The downstream document sink interface
//! - Per-target host load accounting (rate limits, cooldowns, backoff)
//! - The traversal driver (batch pull, delivery, checkpoint tokens)
//! - The traversal runner (schedule, budget and persistence around a batch)

pub mod driver;
pub mod error;
pub mod host_load;
pub mod runner;
pub mod sink;

// Re-exports
pub use driver::{BatchOutcome, TraversalDriver};
pub use error::TraversalError;
pub use host_load::{HostLoadManager, DEFAULT_BATCH_SIZE, DEFAULT_LOAD_PER_MINUTE, DEFAULT_PERIOD};
pub use runner::{RunOutcome, SkipReason, TraversalRunner};
pub use sink::{DeliveryError, Document, DocumentSink, MemorySink};
