//! Changefeed command-line support
//!
//! Configuration, state-directory locking, document output and feed wiring
//! shared by the `cf` binary and its integration tests.

pub mod feed;
pub mod locks;
pub mod sink;
pub mod system_config;

pub use feed::Feed;
pub use locks::StateLock;
pub use sink::JsonLinesSink;
pub use system_config::SystemConfig;
