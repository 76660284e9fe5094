//! Error types for traversal

use journal::{StateError, TokenError};
use monitor::ManagerError;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum TraversalError {
    #[error("Traversal has not been started")]
    NotStarted,

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Manager(#[from] ManagerError),

    #[error(transparent)]
    State(#[from] StateError),

    /// The sink ran out of resources mid-batch
    ///
    /// `checkpoint` covers every completed item plus the offending one, so a
    /// retry from it skips that item.
    #[error("Sink resources exhausted after {delivered} documents: {reason}")]
    ResourceExhausted {
        delivered: usize,
        reason: String,
        checkpoint: Option<String>,
    },

    #[error("Batch exceeded its {0:?} budget and was abandoned")]
    BudgetExceeded(Duration),

    #[error("Batch worker failed: {0}")]
    Worker(String),
}

impl TraversalError {
    /// Whether retrying the step cannot help
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TraversalError::Token(_)
                | TraversalError::State(_)
                | TraversalError::Manager(
                    ManagerError::Config(_) | ManagerError::Fatal(_) | ManagerError::Coordinator(_)
                )
        )
    }
}
