//! Per-monitor snapshot directory
//!
//! Layout:
//! ```text
//! <state_dir>/monitors/<id>/
//!   00000000000000000003.snap
//!   00000000000000000004.snap
//!   00000000000000000005.snap.tmp   (scan in progress or interrupted)
//! ```
//! Sequence 0 is the implicit empty snapshot and never exists on disk.

use crate::error::{MonitorError, Result};
use feed_core::{SnapshotStore, SnapshotWriter};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const SNAPSHOT_EXT: &str = "snap";

/// Snapshot files of one monitor
#[derive(Debug, Clone)]
pub struct SnapshotDir {
    dir: PathBuf,
}

impl SnapshotDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Create the directory and drop leftovers of interrupted scans
    pub fn prepare(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| MonitorError::io(&self.dir, e))?;

        for entry in fs::read_dir(&self.dir).map_err(|e| MonitorError::io(&self.dir, e))? {
            let entry = entry.map_err(|e| MonitorError::io(&self.dir, e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("tmp") {
                debug!("Removing partial snapshot {}", path.display());
                fs::remove_file(&path).map_err(|e| MonitorError::io(&path, e))?;
            }
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Path of snapshot `seq`
    pub fn snapshot_path(&self, seq: u64) -> PathBuf {
        self.dir.join(format!("{:020}.{}", seq, SNAPSHOT_EXT))
    }

    /// Whether snapshot `seq` is available (the empty snapshot 0 always is)
    pub fn has(&self, seq: u64) -> bool {
        seq == 0 || self.snapshot_path(seq).is_file()
    }

    /// Complete snapshot sequence numbers, ascending
    pub fn sequences(&self) -> Result<Vec<u64>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(MonitorError::io(&self.dir, e)),
        };

        let mut sequences = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| MonitorError::io(&self.dir, e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXT) {
                continue;
            }
            if let Some(seq) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
            {
                sequences.push(seq);
            }
        }
        sequences.sort_unstable();
        Ok(sequences)
    }

    /// Newest complete snapshot, 0 if there is none
    pub fn latest(&self) -> Result<u64> {
        Ok(self.sequences()?.last().copied().unwrap_or(0))
    }

    /// Start writing snapshot `seq`
    pub fn create(&self, seq: u64, sync: bool) -> Result<SnapshotWriter> {
        Ok(SnapshotStore::create(&self.snapshot_path(seq), sync)?)
    }

    /// Open snapshot `seq`; `None` stands for the empty snapshot 0
    pub fn open(&self, seq: u64) -> Result<Option<SnapshotStore>> {
        if seq == 0 {
            return Ok(None);
        }
        Ok(Some(SnapshotStore::open(&self.snapshot_path(seq))?))
    }

    /// Delete snapshot `seq` if present
    pub fn remove(&self, seq: u64) -> Result<()> {
        let path = self.snapshot_path(seq);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MonitorError::io(&path, e)),
        }
    }

    /// Delete every snapshot older than `seq`; returns how many were removed
    pub fn prune_before(&self, seq: u64) -> Result<usize> {
        let stale: Vec<_> = self.sequences()?.into_iter().filter(|&s| s < seq).collect();
        for &s in &stale {
            self.remove(s)?;
        }
        if !stale.is_empty() {
            debug!("Pruned {} snapshots before {} in {}", stale.len(), seq, self.dir.display());
        }
        Ok(stale.len())
    }

    /// Delete every snapshot newer than `seq`
    pub fn truncate_after(&self, seq: u64) -> Result<()> {
        for s in self.sequences()?.into_iter().filter(|&s| s > seq) {
            debug!("Discarding uncommitted snapshot {} in {}", s, self.dir.display());
            self.remove(s)?;
        }
        Ok(())
    }

    /// Remove the directory and everything in it
    pub fn clean(&self) -> Result<()> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MonitorError::io(&self.dir, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feed_core::SnapshotRecord;
    use tempfile::TempDir;

    fn write(dir: &SnapshotDir, seq: u64) {
        let mut writer = dir.create(seq, false).unwrap();
        writer.write(&SnapshotRecord::new("a", "1")).unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn test_sequences_ignore_partial_files() {
        let temp_dir = TempDir::new().unwrap();
        let dir = SnapshotDir::new(temp_dir.path().join("docs"));
        dir.prepare().unwrap();
        assert_eq!(dir.latest().unwrap(), 0);

        write(&dir, 1);
        write(&dir, 2);
        let mut partial = dir.create(3, false).unwrap();
        partial.write(&SnapshotRecord::new("a", "1")).unwrap();
        drop(partial);

        assert_eq!(dir.sequences().unwrap(), vec![1, 2]);
        assert_eq!(dir.latest().unwrap(), 2);

        dir.prepare().unwrap();
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 2);
    }

    #[test]
    fn test_zero_is_the_empty_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let dir = SnapshotDir::new(temp_dir.path());
        assert!(dir.has(0));
        assert!(!dir.has(1));
        assert!(dir.open(0).unwrap().is_none());
        assert!(dir.open(1).is_err());
    }

    #[test]
    fn test_prune_and_truncate() {
        let temp_dir = TempDir::new().unwrap();
        let dir = SnapshotDir::new(temp_dir.path().join("m"));
        dir.prepare().unwrap();
        for seq in 1..=5 {
            write(&dir, seq);
        }

        assert_eq!(dir.prune_before(3).unwrap(), 2);
        dir.truncate_after(4).unwrap();
        assert_eq!(dir.sequences().unwrap(), vec![3, 4]);

        dir.clean().unwrap();
        assert!(!dir.path().exists());
        assert!(dir.sequences().unwrap().is_empty());
    }
}
