//! Traversal driver
//!
//! Pulls batches of changes from a monitor manager, hands them to the sink
//! and turns the delivered positions into checkpoint tokens the caller
//! persists and later passes back to `resume_traversal`.

use crate::error::TraversalError;
use crate::sink::{DeliveryError, Document, DocumentSink};
use feed_core::MonitorCheckpoint;
use journal::GlobalCheckpoint;
use monitor::{ManagerError, MonitorManager};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Result of one batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Documents accepted by the sink
    pub count: usize,
    /// Documents the sink rejected (skipped)
    pub rejected: usize,
    /// Token to resume after this batch, if any progress was made
    pub checkpoint: Option<String>,
}

pub struct TraversalDriver {
    manager: Arc<MonitorManager>,
    sink: Box<dyn DocumentSink>,
    batch_hint: Option<usize>,
    wait: Duration,
    last_checkpoint: Option<GlobalCheckpoint>,
}

impl TraversalDriver {
    pub fn new(manager: Arc<MonitorManager>, sink: Box<dyn DocumentSink>) -> Self {
        Self {
            manager,
            sink,
            batch_hint: None,
            wait: Duration::from_millis(100),
            last_checkpoint: None,
        }
    }

    /// How long a batch waits for the next change before ending early
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub fn manager(&self) -> &Arc<MonitorManager> {
        &self.manager
    }

    /// Begin a traversal from scratch, discarding all monitor state
    pub fn start_traversal(&mut self) -> Result<(), TraversalError> {
        info!("Starting fresh traversal");
        self.manager.clean()?;
        self.manager.start(None)?;
        self.last_checkpoint = None;
        Ok(())
    }

    /// Continue a traversal from a token issued by `run_batch`
    ///
    /// A token equal to the last one issued while the manager is still
    /// running continues in place; anything else restarts the monitors from
    /// the token's positions.
    pub fn resume_traversal(&mut self, token: &str) -> Result<(), TraversalError> {
        let checkpoint = GlobalCheckpoint::decode(token)?;

        if self.manager.is_running() && self.last_checkpoint.as_ref() == Some(&checkpoint) {
            debug!("Continuing traversal at queue position {}", checkpoint.queue_position);
            self.manager.mark_durable(&checkpoint);
            return Ok(());
        }

        info!("Resuming traversal from queue position {}", checkpoint.queue_position);
        self.manager.stop();
        self.manager.start(Some(&checkpoint))?;
        self.last_checkpoint = Some(checkpoint);
        Ok(())
    }

    /// Start only if nothing is running yet; used when no token is persisted
    pub fn ensure_started(&mut self) -> Result<(), TraversalError> {
        if self.manager.is_running() {
            return Ok(());
        }
        self.start_traversal()
    }

    /// Cap every subsequent batch at `hint` items
    pub fn set_batch_hint(&mut self, hint: usize) {
        self.batch_hint = Some(hint);
    }

    pub fn batch_hint(&self) -> Option<usize> {
        self.batch_hint
    }

    /// Last token produced
    pub fn checkpoint(&self) -> Option<&GlobalCheckpoint> {
        self.last_checkpoint.as_ref()
    }

    /// Deliver up to `hint` changes
    ///
    /// Rejected documents are skipped but still count as processed, so
    /// their checkpoint advances. Resource exhaustion checkpoints everything
    /// processed including the offending change, then fails the batch.
    pub fn run_batch(&mut self, hint: usize) -> Result<BatchOutcome, TraversalError> {
        if !self.manager.is_running() {
            return Err(TraversalError::NotStarted);
        }

        let limit = self.batch_hint.map_or(hint, |cap| cap.min(hint));
        let generation = self.manager.generation();

        let mut count = 0;
        let mut rejected = 0;
        let mut progress: BTreeMap<String, MonitorCheckpoint> = BTreeMap::new();
        let mut last_sequence = None;
        let mut exhausted = None;

        while count + rejected < limit {
            let Some(queued) = self.manager.take_change(self.wait)? else {
                break;
            };
            let document = Document::from_queued(&queued);

            match self.sink.deliver(&document) {
                Ok(()) => count += 1,
                Err(DeliveryError::Rejected { id, reason }) => {
                    warn!("Skipping document '{}': {}", id, reason);
                    rejected += 1;
                }
                Err(DeliveryError::ResourceExhausted(reason)) => {
                    error!("Sink exhausted at document '{}': {}", document.id, reason);
                    exhausted = Some(reason);
                }
            }

            let checkpoint = queued.change.checkpoint().clone();
            progress.insert(checkpoint.monitor.clone(), checkpoint);
            last_sequence = Some(queued.sequence);

            if exhausted.is_some() {
                break;
            }
        }

        let token = match last_sequence {
            Some(sequence) => self.commit(generation, progress, sequence)?,
            None => None,
        };

        if let Some(reason) = exhausted {
            return Err(TraversalError::ResourceExhausted {
                delivered: count,
                reason,
                checkpoint: token,
            });
        }

        debug!("Batch delivered {} documents ({} rejected)", count, rejected);
        Ok(BatchOutcome {
            count,
            rejected,
            checkpoint: token,
        })
    }

    fn commit(
        &mut self,
        generation: u64,
        progress: BTreeMap<String, MonitorCheckpoint>,
        sequence: u64,
    ) -> Result<Option<String>, TraversalError> {
        let checkpoints: Vec<_> = progress.into_values().collect();
        match self.manager.commit(generation, &checkpoints) {
            Ok(()) => {}
            Err(e @ (ManagerError::Stale | ManagerError::InvalidState(_))) => {
                // Manager restarted under us; the batch will be delivered again
                warn!("Batch not checkpointed: {}", e);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }

        let checkpoint = GlobalCheckpoint::new(self.manager.committed_checkpoints(), sequence);
        let token = checkpoint.encode();
        self.last_checkpoint = Some(checkpoint);
        Ok(Some(token))
    }

    /// Stop the monitors; the next batch requires a start or resume
    pub fn stop(&mut self) {
        self.manager.stop();
    }
}
