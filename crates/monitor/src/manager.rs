//! Monitor lifecycle management
//!
//! The manager owns the shared change queue and checkpoint coordinator, and
//! one background thread per monitor. Consumers pull changes from it and
//! report delivered checkpoints back through `commit`.

use crate::error::{ManagerError, ManagerState, MonitorError};
use crate::monitor::{MonitorConfig, MonitorState, MonitorStatus, MonitorTask, StartPosition};
use crate::producer::SnapshotProducer;
use crate::snapshots::SnapshotDir;
use crossbeam_channel::Sender;
use feed_core::MonitorCheckpoint;
use journal::{
    ChangeQueue, CheckpointCoordinator, CoordinatorError, GlobalCheckpoint, QueuedChange,
    DEFAULT_MAX_QUEUE_SIZE,
};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Settings shared by all monitors of a manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Root of all on-disk monitor state
    pub state_dir: PathBuf,
    /// Bound on buffered changes
    pub queue_capacity: usize,
}

impl ManagerConfig {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            queue_capacity: DEFAULT_MAX_QUEUE_SIZE,
        }
    }
}

struct MonitorEntry {
    config: MonitorConfig,
    producer: Arc<dyn SnapshotProducer>,
    status: Arc<RwLock<MonitorStatus>>,
}

struct Running {
    stop: Sender<()>,
    threads: Vec<(String, JoinHandle<()>)>,
}

struct Lifecycle {
    state: ManagerState,
    generation: u64,
    running: Option<Running>,
}

/// Snapshot of the manager's state
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
    pub state: ManagerState,
    pub generation: u64,
    pub queue_len: usize,
    pub queue_capacity: usize,
    pub fault: Option<String>,
    pub monitors: Vec<MonitorStatus>,
}

/// Owns a set of monitors, their queue and their checkpoints
pub struct MonitorManager {
    config: ManagerConfig,
    monitors: RwLock<Vec<MonitorEntry>>,
    queue: Arc<ChangeQueue>,
    coordinator: Arc<CheckpointCoordinator>,
    lifecycle: Mutex<Lifecycle>,
    fatal: Arc<Mutex<Option<String>>>,
}

impl MonitorManager {
    pub fn new(config: ManagerConfig) -> Self {
        let coordinator = CheckpointCoordinator::new();
        coordinator.maximum_queue_size(config.queue_capacity);
        let queue = ChangeQueue::new(coordinator.max_queue_size());
        queue.close();

        Self {
            config,
            monitors: RwLock::new(Vec::new()),
            queue: Arc::new(queue),
            coordinator: Arc::new(coordinator),
            lifecycle: Mutex::new(Lifecycle {
                state: ManagerState::Stopped,
                generation: 0,
                running: None,
            }),
            fatal: Arc::new(Mutex::new(None)),
        }
    }

    /// Register a monitor; only allowed while stopped
    ///
    /// Configuration problems are reported by `start`.
    pub fn add_monitor(
        &self,
        config: MonitorConfig,
        producer: Arc<dyn SnapshotProducer>,
    ) -> Result<(), ManagerError> {
        let lifecycle = self.lifecycle.lock();
        if lifecycle.state != ManagerState::Stopped {
            return Err(ManagerError::InvalidState(lifecycle.state));
        }

        let status = Arc::new(RwLock::new(MonitorStatus::new(&config.id)));
        self.monitors.write().push(MonitorEntry {
            config,
            producer,
            status,
        });
        Ok(())
    }

    /// Change the queue bound; takes effect at the next start
    pub fn maximum_queue_size(&self, size: usize) {
        self.coordinator.maximum_queue_size(size);
    }

    pub fn max_queue_size(&self) -> usize {
        self.coordinator.max_queue_size()
    }

    /// Start every monitor
    ///
    /// With a checkpoint each monitor resumes from its recorded position;
    /// without one it resumes from its committed position in this process,
    /// or else from its newest snapshot on disk. Idempotent while running.
    pub fn start(&self, checkpoint: Option<&GlobalCheckpoint>) -> Result<(), ManagerError> {
        let mut lifecycle = self.lifecycle.lock();
        match lifecycle.state {
            ManagerState::Running => {
                debug!("Monitor manager already running");
                return Ok(());
            }
            ManagerState::Stopped => {}
            other => return Err(ManagerError::InvalidState(other)),
        }

        lifecycle.state = ManagerState::Starting;
        match self.launch(checkpoint) {
            Ok(running) => {
                lifecycle.generation += 1;
                lifecycle.running = Some(running);
                lifecycle.state = ManagerState::Running;
                info!(
                    "Monitor manager running (generation {}, {} monitors)",
                    lifecycle.generation,
                    self.monitors.read().len()
                );
                Ok(())
            }
            Err(e) => {
                error!("Monitor manager failed to start: {}", e);
                lifecycle.state = ManagerState::Stopped;
                Err(e)
            }
        }
    }

    fn launch(&self, checkpoint: Option<&GlobalCheckpoint>) -> Result<Running, ManagerError> {
        let monitors = self.monitors.read();
        self.validate(&monitors)?;

        let mut dirs = BTreeMap::new();
        let mut guarantees = BTreeMap::new();
        for entry in monitors.iter() {
            let id = &entry.config.id;
            let dir = self.snapshot_dir(id);
            dir.prepare()?;

            let position = match checkpoint.and_then(|c| c.monitor(id)) {
                Some(recorded) => recorded.clone(),
                None => match self.coordinator.committed(id) {
                    Some(committed) => committed,
                    None => MonitorCheckpoint::new(id.clone(), dir.latest()? + 1, 0),
                },
            };
            guarantees.insert(id.clone(), position);
            dirs.insert(id.clone(), dir);
        }

        if let Some(checkpoint) = checkpoint {
            for id in checkpoint.monitors.keys() {
                if !dirs.contains_key(id) {
                    warn!("Checkpoint names unknown monitor '{}'; ignoring it", id);
                }
            }
        }

        self.coordinator.accept_guarantees(&guarantees, |cp| {
            let dir = dirs
                .get(&cp.monitor)
                .ok_or_else(|| format!("no monitor '{}'", cp.monitor))?;
            StartPosition::resolve(cp, dir).map(|_| ())
        })?;

        // Snapshots newer than the restart point were never delivered; they
        // are produced again by the resumed monitor
        let mut starts = BTreeMap::new();
        for (id, position) in &guarantees {
            let dir = &dirs[id];
            let start = StartPosition::resolve(position, dir).map_err(|reason| {
                ManagerError::Coordinator(CoordinatorError::CannotHonor {
                    checkpoint: position.clone(),
                    reason,
                })
            })?;
            dir.truncate_after(position.snapshot)?;
            starts.insert(id.clone(), start);
        }

        *self.fatal.lock() = None;
        self.queue.set_capacity(self.coordinator.max_queue_size());
        let next_sequence = checkpoint.map(|c| c.queue_position + 1).unwrap_or(1);
        self.queue.reopen(next_sequence);

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let mut threads = Vec::with_capacity(monitors.len());
        for entry in monitors.iter() {
            let id = entry.config.id.clone();
            {
                let mut status = entry.status.write();
                *status = MonitorStatus::new(&id);
            }

            let task = MonitorTask {
                config: entry.config.clone(),
                producer: Arc::clone(&entry.producer),
                snapshots: dirs[&id].clone(),
                queue: Arc::clone(&self.queue),
                coordinator: Arc::clone(&self.coordinator),
                status: Arc::clone(&entry.status),
                fatal: Arc::clone(&self.fatal),
                stop: stop_rx.clone(),
                baseline: 0,
            };
            let start = starts[&id].clone();

            let spawned = std::thread::Builder::new()
                .name(format!("monitor-{}", id))
                .spawn(move || task.run(start));
            match spawned {
                Ok(handle) => threads.push((id, handle)),
                Err(e) => {
                    let running = Running { stop: stop_tx, threads };
                    self.shutdown(running);
                    return Err(MonitorError::io(&self.config.state_dir, e).into());
                }
            }
        }

        Ok(Running {
            stop: stop_tx,
            threads,
        })
    }

    fn validate(&self, monitors: &[MonitorEntry]) -> Result<(), ManagerError> {
        if self.config.queue_capacity == 0 {
            return Err(ManagerError::Config("queue capacity must be positive".to_string()));
        }

        let mut seen = std::collections::HashSet::new();
        for entry in monitors {
            entry.config.validate().map_err(ManagerError::Config)?;
            if !seen.insert(entry.config.id.as_str()) {
                return Err(ManagerError::Config(format!(
                    "duplicate monitor id '{}'",
                    entry.config.id
                )));
            }
        }
        Ok(())
    }

    /// Stop every monitor and wait for their threads
    ///
    /// Buffered changes are discarded and guarantees rewind to the committed
    /// positions; a later start re-produces anything not yet committed.
    pub fn stop(&self) {
        let running = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state != ManagerState::Running {
                return;
            }
            lifecycle.state = ManagerState::Stopping;
            lifecycle.running.take()
        };

        if let Some(running) = running {
            self.shutdown(running);
        }

        self.lifecycle.lock().state = ManagerState::Stopped;
        info!("Monitor manager stopped");
    }

    fn shutdown(&self, running: Running) {
        let Running { stop, threads } = running;
        drop(stop);
        self.queue.close();

        for (id, handle) in threads {
            if handle.join().is_err() {
                error!("Monitor '{}' thread panicked", id);
            }
        }
        self.coordinator.rewind_to_committed();
    }

    /// Stop, then discard all on-disk snapshot state and checkpoints
    pub fn clean(&self) -> Result<(), ManagerError> {
        self.stop();

        for entry in self.monitors.read().iter() {
            self.snapshot_dir(&entry.config.id).clean()?;
        }
        self.coordinator.reset();
        info!("Discarded monitor state under {}", self.monitors_root().display());
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.lock().state == ManagerState::Running
    }

    pub fn state(&self) -> ManagerState {
        self.lifecycle.lock().state
    }

    /// Identifies the current run; checkpoints from another run are stale
    pub fn generation(&self) -> u64 {
        self.lifecycle.lock().generation
    }

    /// Next buffered change without waiting
    pub fn poll_change(&self) -> Result<Option<QueuedChange>, ManagerError> {
        self.check_fatal()?;
        Ok(self.queue.poll())
    }

    /// Next buffered change, waiting up to `timeout`
    pub fn take_change(&self, timeout: Duration) -> Result<Option<QueuedChange>, ManagerError> {
        self.check_fatal()?;
        Ok(self.queue.take(timeout))
    }

    /// Record delivered checkpoints of run `generation`
    ///
    /// An inconsistency stops the manager.
    pub fn commit(
        &self,
        generation: u64,
        checkpoints: &[MonitorCheckpoint],
    ) -> Result<(), ManagerError> {
        let result = {
            let lifecycle = self.lifecycle.lock();
            if lifecycle.state != ManagerState::Running {
                return Err(ManagerError::InvalidState(lifecycle.state));
            }
            if lifecycle.generation != generation {
                return Err(ManagerError::Stale);
            }
            checkpoints
                .iter()
                .try_for_each(|checkpoint| self.coordinator.commit(checkpoint))
        };

        result.map_err(|e| {
            error!("Checkpoint inconsistency, stopping monitor manager: {}", e);
            self.fatal.lock().get_or_insert_with(|| e.to_string());
            self.stop();
            ManagerError::from(e)
        })
    }

    /// Record that `checkpoint` was persisted by the caller
    ///
    /// Snapshots it depends on are kept until a newer one is marked.
    pub fn mark_durable(&self, checkpoint: &GlobalCheckpoint) {
        for position in checkpoint.monitors.values() {
            self.coordinator.mark_durable(position);
        }
    }

    /// Committed position of every monitor
    pub fn committed_checkpoints(&self) -> BTreeMap<String, MonitorCheckpoint> {
        self.coordinator.committed_all()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Monitors stopped by a corruption error, with the error message
    pub fn monitor_faults(&self) -> Vec<(String, String)> {
        self.monitors
            .read()
            .iter()
            .filter_map(|entry| {
                let status = entry.status.read();
                match (status.state, &status.last_error) {
                    (MonitorState::Faulted, Some(message)) => {
                        Some((status.id.clone(), message.clone()))
                    }
                    _ => None,
                }
            })
            .collect()
    }

    pub fn status(&self) -> ManagerStatus {
        let lifecycle = self.lifecycle.lock();
        let monitors = self
            .monitors
            .read()
            .iter()
            .map(|entry| {
                let mut status = entry.status.read().clone();
                if let Some(progress) = self.coordinator.progress(&status.id) {
                    status.committed = Some(progress.committed);
                    status.guaranteed = Some(progress.guaranteed);
                }
                status
            })
            .collect();

        ManagerStatus {
            state: lifecycle.state,
            generation: lifecycle.generation,
            queue_len: self.queue.len(),
            queue_capacity: self.queue.capacity(),
            fault: self.fatal.lock().clone(),
            monitors,
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.config.state_dir
    }

    fn check_fatal(&self) -> Result<(), ManagerError> {
        let fault = self.fatal.lock().clone();
        match fault {
            Some(message) => {
                self.stop();
                Err(ManagerError::Fatal(message))
            }
            None => Ok(()),
        }
    }

    fn monitors_root(&self) -> PathBuf {
        self.config.state_dir.join("monitors")
    }

    fn snapshot_dir(&self, id: &str) -> SnapshotDir {
        SnapshotDir::new(self.monitors_root().join(id))
    }
}

impl Drop for MonitorManager {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::MemoryProducer;
    use feed_core::SnapshotRecord;
    use tempfile::TempDir;

    fn manager(temp: &TempDir, producer: Arc<MemoryProducer>) -> MonitorManager {
        let manager = MonitorManager::new(ManagerConfig::new(temp.path()));
        let config = MonitorConfig::new("docs").with_scan_interval(Duration::from_millis(20));
        manager.add_monitor(config, producer).unwrap();
        manager
    }

    fn take_ids(manager: &MonitorManager, n: usize) -> Vec<QueuedChange> {
        (0..n)
            .map(|_| manager.take_change(Duration::from_secs(5)).unwrap().unwrap())
            .collect()
    }

    #[test]
    fn test_start_is_idempotent_and_stop_joins() {
        let temp = TempDir::new().unwrap();
        let producer = Arc::new(MemoryProducer::new());
        producer.upsert(SnapshotRecord::new("a", "1"));
        let manager = manager(&temp, producer);

        manager.start(None).unwrap();
        let generation = manager.generation();
        manager.start(None).unwrap();
        assert!(manager.is_running());
        assert_eq!(manager.generation(), generation);

        let changes = take_ids(&manager, 1);
        assert_eq!(changes[0].change.document_id(), "a");

        manager.stop();
        assert!(!manager.is_running());
        assert_eq!(manager.state(), ManagerState::Stopped);
        manager.stop();
    }

    #[test]
    fn test_config_errors_rejected_at_start() {
        let temp = TempDir::new().unwrap();
        let manager = MonitorManager::new(ManagerConfig::new(temp.path()));
        let producer = Arc::new(MemoryProducer::new());
        manager.add_monitor(MonitorConfig::new("dup"), producer.clone()).unwrap();
        manager.add_monitor(MonitorConfig::new("dup"), producer).unwrap();

        let err = manager.start(None).unwrap_err();
        assert!(matches!(err, ManagerError::Config(_)));
        assert!(err.to_string().contains("duplicate"));
        assert!(!manager.is_running());
    }

    #[test]
    fn test_restart_resumes_from_committed() {
        let temp = TempDir::new().unwrap();
        let producer = Arc::new(MemoryProducer::new());
        for id in ["a", "b", "c", "d"] {
            producer.upsert(SnapshotRecord::new(id, "1"));
        }
        let manager = manager(&temp, producer);
        manager.start(None).unwrap();

        let delivered = take_ids(&manager, 2);
        let checkpoints: Vec<_> = delivered.iter().map(|q| q.change.checkpoint().clone()).collect();
        manager.commit(manager.generation(), &checkpoints).unwrap();
        manager.stop();

        manager.start(None).unwrap();
        let replayed = take_ids(&manager, 2);
        let ids: Vec<_> = replayed.iter().map(|q| q.change.document_id().to_string()).collect();
        assert_eq!(ids, vec!["c", "d"]);
        manager.stop();
    }

    #[test]
    fn test_commit_from_previous_run_is_stale() {
        let temp = TempDir::new().unwrap();
        let producer = Arc::new(MemoryProducer::new());
        producer.upsert(SnapshotRecord::new("a", "1"));
        let manager = manager(&temp, producer);

        manager.start(None).unwrap();
        let old = manager.generation();
        let change = take_ids(&manager, 1).remove(0);
        manager.stop();

        assert!(matches!(
            manager.commit(old, &[change.change.checkpoint().clone()]),
            Err(ManagerError::InvalidState(ManagerState::Stopped))
        ));

        manager.start(None).unwrap();
        assert!(matches!(
            manager.commit(old, &[change.change.checkpoint().clone()]),
            Err(ManagerError::Stale)
        ));
        manager.stop();
    }

    #[test]
    fn test_inconsistent_commit_stops_manager() {
        let temp = TempDir::new().unwrap();
        let producer = Arc::new(MemoryProducer::new());
        let manager = manager(&temp, producer);
        manager.start(None).unwrap();

        let bogus = MonitorCheckpoint::new("docs", 99, 1);
        let err = manager.commit(manager.generation(), &[bogus]).unwrap_err();
        assert!(matches!(err, ManagerError::Coordinator(_)));
        assert!(!manager.is_running());
        assert!(manager.status().fault.is_some());
    }

    #[test]
    fn test_token_naming_pruned_snapshot_is_rejected() {
        let temp = TempDir::new().unwrap();
        let producer = Arc::new(MemoryProducer::new());
        let manager = manager(&temp, producer);

        let mut monitors = BTreeMap::new();
        monitors.insert("docs".to_string(), MonitorCheckpoint::new("docs", 7, 3));
        let token = GlobalCheckpoint::new(monitors, 10);

        assert!(matches!(
            manager.start(Some(&token)),
            Err(ManagerError::Coordinator(CoordinatorError::CannotHonor { .. }))
        ));
        assert!(!manager.is_running());
    }

    #[test]
    fn test_clean_discards_snapshots() {
        let temp = TempDir::new().unwrap();
        let producer = Arc::new(MemoryProducer::new());
        producer.upsert(SnapshotRecord::new("a", "1"));
        let manager = manager(&temp, producer);

        manager.start(None).unwrap();
        take_ids(&manager, 1);
        manager.clean().unwrap();

        assert!(!manager.is_running());
        assert!(manager.committed_checkpoints().is_empty());
        assert!(!temp.path().join("monitors/docs").exists());

        manager.start(None).unwrap();
        assert_eq!(take_ids(&manager, 1)[0].change.document_id(), "a");
        manager.stop();
    }

    #[test]
    fn test_queue_positions_continue_from_token() {
        let temp = TempDir::new().unwrap();
        let producer = Arc::new(MemoryProducer::new());
        producer.upsert(SnapshotRecord::new("a", "1"));
        let manager = manager(&temp, producer);

        let mut monitors = BTreeMap::new();
        monitors.insert("docs".to_string(), MonitorCheckpoint::initial("docs"));
        manager.start(Some(&GlobalCheckpoint::new(monitors, 41))).unwrap();

        assert_eq!(take_ids(&manager, 1)[0].sequence, 42);
        manager.stop();
    }
}
