//! Monitor scan loop
//!
//! Every cycle a monitor writes snapshot `n + 1` from its producer, diffs it
//! against snapshot `n` and hands the resulting changes to the shared queue.
//! Change `k` of that diff carries checkpoint `(n + 1, k)`, so a restart from
//! a committed checkpoint re-runs the same diff and skips what was already
//! delivered.

use crate::error::{MonitorError, Result};
use crate::producer::SnapshotProducer;
use crate::snapshots::SnapshotDir;
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use feed_core::{
    diff_snapshots, sort_and_dedup, Change, CoreError, DiffEvent, MonitorCheckpoint,
    SnapshotRecord, SnapshotStore,
};
use journal::{ChangeQueue, CheckpointCoordinator, QueueError};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Records between checks of the stop signal while scanning
const STOP_CHECK_INTERVAL: usize = 256;

/// Settings of one monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Unique monitor id; also the name of its snapshot directory
    pub id: String,
    /// Pause between scan cycles
    pub scan_interval: Duration,
    /// Wait for queue space before re-checking the stop signal
    pub put_timeout: Duration,
    /// fsync every snapshot record
    pub sync_writes: bool,
}

impl MonitorConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            scan_interval: Duration::from_secs(60),
            put_timeout: Duration::from_secs(1),
            sync_writes: false,
        }
    }

    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }

    pub(crate) fn validate(&self) -> std::result::Result<(), String> {
        if self.id.is_empty() {
            return Err("monitor id must not be empty".to_string());
        }
        if !self
            .id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            || self.id.starts_with('.')
        {
            return Err(format!(
                "monitor id '{}' may only contain ASCII letters, digits, '-', '_' and '.'",
                self.id
            ));
        }
        if self.scan_interval.is_zero() {
            return Err(format!("monitor '{}': scan interval must be positive", self.id));
        }
        if self.put_timeout.is_zero() {
            return Err(format!("monitor '{}': put timeout must be positive", self.id));
        }
        Ok(())
    }
}

/// What a monitor is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    Idle,
    Scanning,
    Stopped,
    Faulted,
}

/// Observable state of one monitor
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub id: String,
    pub state: MonitorState,
    /// Completed scan cycles since start
    pub cycles: u64,
    /// Changes handed to the queue since start
    pub changes: u64,
    /// Snapshot the next scan is diffed against
    pub baseline: u64,
    pub last_error: Option<String>,
    pub committed: Option<MonitorCheckpoint>,
    pub guaranteed: Option<MonitorCheckpoint>,
}

impl MonitorStatus {
    pub(crate) fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            state: MonitorState::Stopped,
            cycles: 0,
            changes: 0,
            baseline: 0,
            last_error: None,
            committed: None,
            guaranteed: None,
        }
    }
}

/// Where a monitor picks up after start
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StartPosition {
    /// Re-run the diff that created `snapshot`, skipping `offset` changes
    Resume(MonitorCheckpoint),
    /// Next scan creates snapshot `baseline + 1`
    Fresh { baseline: u64 },
}

impl StartPosition {
    /// Resolve a checkpoint against the files on disk
    pub(crate) fn resolve(
        checkpoint: &MonitorCheckpoint,
        snapshots: &SnapshotDir,
    ) -> std::result::Result<Self, String> {
        let seq = checkpoint.snapshot;
        if seq == 0 {
            return Err("snapshot 0 is not a valid position".to_string());
        }
        if !snapshots.has(seq - 1) {
            return Err(format!("predecessor snapshot {} is no longer available", seq - 1));
        }

        if snapshots.has(seq) {
            Ok(Self::Resume(checkpoint.clone()))
        } else if checkpoint.offset == 0 {
            Ok(Self::Fresh { baseline: seq - 1 })
        } else {
            Err(format!("snapshot {} is no longer available", seq))
        }
    }
}

enum Flow {
    Continue,
    Stop,
}

enum Emitted {
    Completed(u64),
    Stopped,
}

/// Background task of one monitor
pub(crate) struct MonitorTask {
    pub(crate) config: MonitorConfig,
    pub(crate) producer: Arc<dyn SnapshotProducer>,
    pub(crate) snapshots: SnapshotDir,
    pub(crate) queue: Arc<ChangeQueue>,
    pub(crate) coordinator: Arc<CheckpointCoordinator>,
    pub(crate) status: Arc<RwLock<MonitorStatus>>,
    pub(crate) fatal: Arc<Mutex<Option<String>>>,
    pub(crate) stop: Receiver<()>,
    pub(crate) baseline: u64,
}

impl MonitorTask {
    /// Run until stopped or faulted
    pub(crate) fn run(mut self, start: StartPosition) {
        info!(
            "Monitor '{}' starting at {:?} (interval: {:?})",
            self.config.id, start, self.config.scan_interval
        );

        match self.run_cycles(start) {
            Ok(()) => {
                info!("Monitor '{}' stopped", self.config.id);
                self.status.write().state = MonitorState::Stopped;
            }
            Err(e) => {
                error!("Monitor '{}' faulted: {}", self.config.id, e);
                if e.is_fatal() {
                    self.fatal.lock().get_or_insert_with(|| e.to_string());
                }
                let mut status = self.status.write();
                status.state = MonitorState::Faulted;
                status.last_error = Some(e.to_string());
            }
        }
    }

    fn run_cycles(&mut self, start: StartPosition) -> Result<()> {
        let mut pending = match start {
            StartPosition::Resume(checkpoint) => Some(checkpoint),
            StartPosition::Fresh { baseline } => {
                self.baseline = baseline;
                None
            }
        };
        self.status.write().baseline = self.baseline;

        loop {
            self.status.write().state = MonitorState::Scanning;

            let outcome = match &pending {
                Some(checkpoint) => self.finish_snapshot(checkpoint.snapshot, checkpoint.offset),
                None => self.scan_cycle(),
            };

            match outcome {
                Ok(Flow::Stop) => return Ok(()),
                Ok(Flow::Continue) => {
                    pending = None;
                    self.status.write().last_error = None;
                }
                Err(e) if e.is_corruption() || e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Monitor '{}' scan failed, retrying next interval: {}", self.config.id, e);
                    self.status.write().last_error = Some(e.to_string());
                    pending = self.retry_point();
                }
            }

            self.prune();
            self.status.write().state = MonitorState::Idle;

            match self.stop.recv_timeout(self.config.scan_interval) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => return Ok(()),
            }
        }
    }

    fn scan_cycle(&mut self) -> Result<Flow> {
        let seq = self.baseline + 1;
        match self.write_snapshot(seq)? {
            Some(records) => {
                debug!("Monitor '{}' wrote snapshot {} ({} records)", self.config.id, seq, records)
            }
            None => return Ok(Flow::Stop),
        }
        self.finish_snapshot(seq, 0)
    }

    /// Write snapshot `seq`; `None` if stopped mid-scan
    fn write_snapshot(&self, seq: u64) -> Result<Option<u64>> {
        let ordering = self.producer.ordering();
        let records = self.producer.records().map_err(MonitorError::Producer)?;
        let mut writer = self.snapshots.create(seq, self.config.sync_writes)?;

        if self.producer.is_ordered() {
            // Duplicates are adjacent; the later one wins
            let mut pending: Option<SnapshotRecord> = None;
            for (n, record) in records.enumerate() {
                if n % STOP_CHECK_INTERVAL == 0 && self.stop_requested() {
                    return Ok(None);
                }
                let record = record.map_err(MonitorError::Producer)?;
                if let Some(previous) = pending.take() {
                    if previous.id != record.id {
                        if ordering.compare(&previous.id, &record.id) == Ordering::Greater {
                            return Err(CoreError::OutOfOrder {
                                previous: previous.id,
                                next: record.id,
                            }
                            .into());
                        }
                        writer.write(&previous)?;
                    }
                }
                pending = Some(record);
            }
            if let Some(last) = pending {
                writer.write(&last)?;
            }
        } else {
            let mut collected = Vec::new();
            for (n, record) in records.enumerate() {
                if n % STOP_CHECK_INTERVAL == 0 && self.stop_requested() {
                    return Ok(None);
                }
                collected.push(record.map_err(MonitorError::Producer)?);
            }
            for record in sort_and_dedup(collected, ordering) {
                writer.write(&record)?;
            }
        }

        let count = writer.records();
        writer.finish()?;
        Ok(Some(count))
    }

    /// Emit the diff that created `seq`, then make `seq` the baseline
    fn finish_snapshot(&mut self, seq: u64, skip: u64) -> Result<Flow> {
        let produced = match self.emit(seq, skip)? {
            Emitted::Completed(produced) => produced,
            Emitted::Stopped => return Ok(Flow::Stop),
        };

        if produced < skip {
            warn!(
                "Monitor '{}': snapshot {} yields {} changes but checkpoint claims {}",
                self.config.id, seq, produced, skip
            );
        }

        if produced == 0 {
            // Nothing changed; keep the predecessor so idle cycles do not pile up files
            self.snapshots.remove(seq)?;
            self.baseline = seq - 1;
        } else {
            info!(
                "Monitor '{}' emitted {} changes from snapshot {}",
                self.config.id,
                produced.saturating_sub(skip),
                seq
            );
            self.baseline = seq;
        }

        let mut status = self.status.write();
        status.cycles += 1;
        status.baseline = self.baseline;
        Ok(Flow::Continue)
    }

    fn emit(&self, seq: u64, skip: u64) -> Result<Emitted> {
        let previous: Box<dyn Iterator<Item = feed_core::Result<SnapshotRecord>>> =
            match self.snapshots.open(seq - 1)? {
                Some(store) => Box::new(store.read()?),
                None => Box::new(std::iter::empty()),
            };
        let current = SnapshotStore::open(&self.snapshots.snapshot_path(seq))?;
        let events = diff_snapshots(previous, current.read()?, self.producer.ordering());
        self.emit_events(seq, skip, events)
    }

    /// Queue the diff events of `seq`, skipping the first `skip`
    fn emit_events<I>(&self, seq: u64, skip: u64, events: I) -> Result<Emitted>
    where
        I: Iterator<Item = feed_core::Result<DiffEvent>>,
    {
        let mut offset = 0;
        for event in events {
            let event = event?;
            offset += 1;
            if offset <= skip {
                continue;
            }

            let checkpoint = MonitorCheckpoint::new(self.config.id.clone(), seq, offset);
            if !self.enqueue(Change::from_event(event, checkpoint))? {
                return Ok(Emitted::Stopped);
            }
        }
        Ok(Emitted::Completed(offset))
    }

    /// Hand a change to the queue; `false` once stopped
    ///
    /// The guarantee is recorded before the put so a consumer can never
    /// commit a checkpoint the coordinator has not seen yet.
    fn enqueue(&self, change: Change) -> Result<bool> {
        self.coordinator.guarantee(change.checkpoint())?;

        let mut change = change;
        loop {
            if self.stop_requested() {
                return Ok(false);
            }
            match self.queue.put(change, self.config.put_timeout) {
                Ok(sequence) => {
                    trace!("Queued change {} at {}", sequence, self.config.id);
                    self.status.write().changes += 1;
                    return Ok(true);
                }
                Err(QueueError::Timeout(returned)) => change = returned,
                Err(QueueError::Closed(_)) => return Ok(false),
            }
        }
    }

    /// Where the next cycle starts after a failed one
    ///
    /// Once part of the diff of `baseline + 1` is queued, that diff has to be
    /// finished from the last guaranteed change. Rescanning would number its
    /// changes from 1 again.
    fn retry_point(&self) -> Option<MonitorCheckpoint> {
        let seq = self.baseline + 1;
        let guaranteed = self.coordinator.guaranteed(&self.config.id)?;
        (guaranteed.snapshot == seq && guaranteed.offset > 0 && self.snapshots.has(seq))
            .then_some(guaranteed)
    }

    /// Drop snapshots nothing can resume from any more
    ///
    /// A stored token may still name the durable position, so everything from
    /// its baseline onwards is kept even after later commits.
    fn prune(&self) {
        let id = &self.config.id;
        let (Some(committed), Some(durable)) =
            (self.coordinator.committed(id), self.coordinator.durable(id))
        else {
            return;
        };
        let keep_from = durable
            .snapshot
            .saturating_sub(1)
            .min(committed.snapshot.saturating_sub(1))
            .min(self.baseline);
        if let Err(e) = self.snapshots.prune_before(keep_from) {
            warn!("Monitor '{}' failed to prune snapshots: {}", self.config.id, e);
        }
    }

    fn stop_requested(&self) -> bool {
        !matches!(self.stop.try_recv(), Err(TryRecvError::Empty))
    }
}
