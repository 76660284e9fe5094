//! Committed and guaranteed progress per monitor
//!
//! `guaranteed` is the checkpoint of the last change handed to the queue;
//! `committed` is the checkpoint of the last change applied downstream.
//! `committed <= guaranteed` holds for every monitor at all times, and any
//! attempt to break it is reported as an inconsistency.
//!
//! `durable` is the newest restart point the caller has persisted. It trails
//! `committed` between a commit and the caller storing its token, so
//! snapshots are only discarded once they fall behind `durable`.

use feed_core::MonitorCheckpoint;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

/// Default bound on buffered changes
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Unknown monitor '{0}'")]
    UnknownMonitor(String),

    #[error("Monitor cannot honor checkpoint {checkpoint}: {reason}")]
    CannotHonor {
        checkpoint: MonitorCheckpoint,
        reason: String,
    },

    #[error(
        "Checkpoint inconsistency for monitor '{monitor}': {operation} {attempted} \
         (committed {committed}, guaranteed {guaranteed})"
    )]
    Inconsistent {
        monitor: String,
        operation: &'static str,
        attempted: MonitorCheckpoint,
        committed: MonitorCheckpoint,
        guaranteed: MonitorCheckpoint,
    },
}

/// Progress markers of one monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorProgress {
    pub durable: MonitorCheckpoint,
    pub committed: MonitorCheckpoint,
    pub guaranteed: MonitorCheckpoint,
}

/// Tracks checkpoint progress for every monitor of a manager
pub struct CheckpointCoordinator {
    monitors: RwLock<BTreeMap<String, MonitorProgress>>,
    max_queue_size: AtomicUsize,
}

impl CheckpointCoordinator {
    pub fn new() -> Self {
        Self {
            monitors: RwLock::new(BTreeMap::new()),
            max_queue_size: AtomicUsize::new(DEFAULT_MAX_QUEUE_SIZE),
        }
    }

    /// Set the bound on buffered changes (also the natural batch boundary)
    pub fn maximum_queue_size(&self, size: usize) {
        self.max_queue_size.store(size.max(1), AtomicOrdering::SeqCst);
    }

    pub fn max_queue_size(&self) -> usize {
        self.max_queue_size.load(AtomicOrdering::SeqCst)
    }

    /// Register a monitor with all markers at `baseline`
    pub fn register(&self, baseline: MonitorCheckpoint) {
        let progress = MonitorProgress {
            durable: baseline.clone(),
            committed: baseline.clone(),
            guaranteed: baseline,
        };
        self.monitors
            .write()
            .insert(progress.committed.monitor.clone(), progress);
    }

    /// Install durable restart points
    ///
    /// Every guarantee is checked with `verify` before any is applied, so a
    /// monitor that cannot honor its checkpoint leaves the coordinator
    /// untouched.
    pub fn accept_guarantees<F>(
        &self,
        guarantees: &BTreeMap<String, MonitorCheckpoint>,
        verify: F,
    ) -> Result<(), CoordinatorError>
    where
        F: Fn(&MonitorCheckpoint) -> Result<(), String>,
    {
        for checkpoint in guarantees.values() {
            verify(checkpoint).map_err(|reason| CoordinatorError::CannotHonor {
                checkpoint: checkpoint.clone(),
                reason,
            })?;
        }

        for checkpoint in guarantees.values() {
            tracing::debug!("Accepted guarantee {}", checkpoint);
            self.register(checkpoint.clone());
        }
        Ok(())
    }

    /// Record that a change up to `checkpoint` was handed to the queue
    pub fn guarantee(&self, checkpoint: &MonitorCheckpoint) -> Result<(), CoordinatorError> {
        let mut monitors = self.monitors.write();
        let progress = monitors
            .get_mut(&checkpoint.monitor)
            .ok_or_else(|| CoordinatorError::UnknownMonitor(checkpoint.monitor.clone()))?;

        if checkpoint.position_cmp(&progress.guaranteed) == Some(Ordering::Less) {
            return Err(inconsistent("guarantee", checkpoint, progress));
        }
        progress.guaranteed = checkpoint.clone();
        Ok(())
    }

    /// Record that changes up to `checkpoint` were applied downstream
    pub fn commit(&self, checkpoint: &MonitorCheckpoint) -> Result<(), CoordinatorError> {
        let mut monitors = self.monitors.write();
        let progress = monitors
            .get_mut(&checkpoint.monitor)
            .ok_or_else(|| CoordinatorError::UnknownMonitor(checkpoint.monitor.clone()))?;

        let behind = checkpoint.position_cmp(&progress.committed) == Some(Ordering::Less);
        let ahead = checkpoint.position_cmp(&progress.guaranteed) == Some(Ordering::Greater);
        if behind || ahead {
            return Err(inconsistent("commit", checkpoint, progress));
        }
        progress.committed = checkpoint.clone();
        Ok(())
    }

    /// Record that the caller persisted a restart point at `checkpoint`
    ///
    /// Only moves forward; unknown monitors are ignored.
    pub fn mark_durable(&self, checkpoint: &MonitorCheckpoint) {
        if let Some(progress) = self.monitors.write().get_mut(&checkpoint.monitor) {
            if checkpoint.position_cmp(&progress.durable) == Some(Ordering::Greater) {
                progress.durable = checkpoint.clone();
            }
        }
    }

    /// Oldest position a restart may still ask for
    pub fn durable(&self, monitor: &str) -> Option<MonitorCheckpoint> {
        self.monitors.read().get(monitor).map(|p| p.durable.clone())
    }

    /// Rewind guarantees to the committed positions
    ///
    /// Used when the in-memory queue is lost: everything guaranteed but not
    /// committed will be produced again.
    pub fn rewind_to_committed(&self) {
        for progress in self.monitors.write().values_mut() {
            progress.guaranteed = progress.committed.clone();
        }
    }

    pub fn committed(&self, monitor: &str) -> Option<MonitorCheckpoint> {
        self.monitors.read().get(monitor).map(|p| p.committed.clone())
    }

    pub fn guaranteed(&self, monitor: &str) -> Option<MonitorCheckpoint> {
        self.monitors.read().get(monitor).map(|p| p.guaranteed.clone())
    }

    pub fn progress(&self, monitor: &str) -> Option<MonitorProgress> {
        self.monitors.read().get(monitor).cloned()
    }

    /// Committed checkpoints of all monitors
    pub fn committed_all(&self) -> BTreeMap<String, MonitorCheckpoint> {
        self.monitors
            .read()
            .iter()
            .map(|(id, p)| (id.clone(), p.committed.clone()))
            .collect()
    }

    /// Forget every monitor
    pub fn reset(&self) {
        self.monitors.write().clear();
    }
}

impl Default for CheckpointCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

fn inconsistent(
    operation: &'static str,
    attempted: &MonitorCheckpoint,
    progress: &MonitorProgress,
) -> CoordinatorError {
    CoordinatorError::Inconsistent {
        monitor: attempted.monitor.clone(),
        operation,
        attempted: attempted.clone(),
        committed: progress.committed.clone(),
        guaranteed: progress.guaranteed.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cp(snapshot: u64, offset: u64) -> MonitorCheckpoint {
        MonitorCheckpoint::new("m", snapshot, offset)
    }

    #[test]
    fn test_guarantee_then_commit() {
        let coordinator = CheckpointCoordinator::new();
        coordinator.register(MonitorCheckpoint::initial("m"));

        coordinator.guarantee(&cp(1, 1)).unwrap();
        coordinator.guarantee(&cp(1, 2)).unwrap();
        coordinator.commit(&cp(1, 1)).unwrap();

        let progress = coordinator.progress("m").unwrap();
        assert_eq!(progress.committed, cp(1, 1));
        assert_eq!(progress.guaranteed, cp(1, 2));
    }

    #[test]
    fn test_commit_beyond_guarantee_is_inconsistent() {
        let coordinator = CheckpointCoordinator::new();
        coordinator.register(MonitorCheckpoint::initial("m"));
        coordinator.guarantee(&cp(1, 1)).unwrap();

        let err = coordinator.commit(&cp(1, 2)).unwrap_err();
        assert!(matches!(err, CoordinatorError::Inconsistent { operation: "commit", .. }));
        assert_eq!(coordinator.committed("m").unwrap(), MonitorCheckpoint::initial("m"));
    }

    #[test]
    fn test_backwards_moves_are_inconsistent() {
        let coordinator = CheckpointCoordinator::new();
        coordinator.register(cp(2, 0));
        coordinator.guarantee(&cp(2, 5)).unwrap();
        coordinator.commit(&cp(2, 3)).unwrap();

        assert!(coordinator.guarantee(&cp(2, 4)).is_err());
        assert!(coordinator.commit(&cp(2, 2)).is_err());
    }

    #[test]
    fn test_unknown_monitor() {
        let coordinator = CheckpointCoordinator::new();
        assert!(matches!(
            coordinator.guarantee(&cp(1, 1)),
            Err(CoordinatorError::UnknownMonitor(_))
        ));
    }

    #[test]
    fn test_accept_guarantees_fails_fast_without_partial_apply() {
        let coordinator = CheckpointCoordinator::new();
        let mut guarantees = BTreeMap::new();
        guarantees.insert("a".to_string(), MonitorCheckpoint::new("a", 3, 1));
        guarantees.insert("b".to_string(), MonitorCheckpoint::new("b", 9, 0));

        let err = coordinator
            .accept_guarantees(&guarantees, |checkpoint| {
                if checkpoint.monitor == "b" {
                    Err("snapshot 9 was pruned".to_string())
                } else {
                    Ok(())
                }
            })
            .unwrap_err();

        assert!(matches!(err, CoordinatorError::CannotHonor { .. }));
        assert!(coordinator.committed("a").is_none());

        coordinator.accept_guarantees(&guarantees, |_| Ok(())).unwrap();
        assert_eq!(coordinator.committed("a").unwrap(), MonitorCheckpoint::new("a", 3, 1));
        assert_eq!(coordinator.guaranteed("b").unwrap(), MonitorCheckpoint::new("b", 9, 0));
    }

    #[test]
    fn test_rewind_to_committed() {
        let coordinator = CheckpointCoordinator::new();
        coordinator.register(MonitorCheckpoint::initial("m"));
        coordinator.guarantee(&cp(1, 10)).unwrap();
        coordinator.commit(&cp(1, 4)).unwrap();

        coordinator.rewind_to_committed();
        assert_eq!(coordinator.guaranteed("m").unwrap(), cp(1, 4));
        assert_eq!(coordinator.committed_all().len(), 1);
    }

    #[test]
    fn test_durable_trails_commits_until_marked() {
        let coordinator = CheckpointCoordinator::new();
        coordinator.register(cp(1, 0));
        coordinator.guarantee(&cp(3, 2)).unwrap();
        coordinator.commit(&cp(3, 2)).unwrap();

        assert_eq!(coordinator.durable("m").unwrap(), cp(1, 0));

        coordinator.mark_durable(&cp(2, 4));
        assert_eq!(coordinator.durable("m").unwrap(), cp(2, 4));

        // Older restart points never move it back
        coordinator.mark_durable(&cp(1, 7));
        assert_eq!(coordinator.durable("m").unwrap(), cp(2, 4));

        coordinator.mark_durable(&MonitorCheckpoint::new("other", 9, 9));
        assert!(coordinator.durable("other").is_none());

        // A restart installs the accepted guarantee as the durable point
        let mut guarantees = BTreeMap::new();
        guarantees.insert("m".to_string(), cp(1, 1));
        coordinator.accept_guarantees(&guarantees, |_| Ok(())).unwrap();
        assert_eq!(coordinator.durable("m").unwrap(), cp(1, 1));
    }

    #[test]
    fn test_maximum_queue_size() {
        let coordinator = CheckpointCoordinator::new();
        assert_eq!(coordinator.max_queue_size(), DEFAULT_MAX_QUEUE_SIZE);
        coordinator.maximum_queue_size(0);
        assert_eq!(coordinator.max_queue_size(), 1);
    }
}
