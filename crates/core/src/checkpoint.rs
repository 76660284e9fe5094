//! Per-monitor diff positions

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Position of a monitor in its change stream
///
/// `snapshot` is the sequence number of the snapshot being diffed against its
/// predecessor; `offset` counts the changes that diff has already produced.
/// `offset == 0` with no snapshot file on disk means the scan that creates
/// `snapshot` has not started yet.
/// A checkpoint taken right after a change was emitted therefore resumes
/// with the change that follows it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MonitorCheckpoint {
    /// Monitor identity
    pub monitor: String,
    /// Snapshot sequence number
    pub snapshot: u64,
    /// Changes already produced while diffing `snapshot`
    pub offset: u64,
}

impl MonitorCheckpoint {
    /// Create a checkpoint
    pub fn new(monitor: impl Into<String>, snapshot: u64, offset: u64) -> Self {
        Self {
            monitor: monitor.into(),
            snapshot,
            offset,
        }
    }

    /// Checkpoint before any snapshot has been taken
    ///
    /// Snapshot 0 is the implicit empty snapshot, so the first real snapshot
    /// is diffed against nothing.
    pub fn initial(monitor: impl Into<String>) -> Self {
        Self::new(monitor, 1, 0)
    }

    /// Compare positions of the same monitor
    ///
    /// Returns `None` for checkpoints of different monitors.
    pub fn position_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.monitor != other.monitor {
            return None;
        }
        Some((self.snapshot, self.offset).cmp(&(other.snapshot, other.offset)))
    }
}

impl std::fmt::Display for MonitorCheckpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.monitor, self.snapshot, self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_ordering() {
        let a = MonitorCheckpoint::new("m", 3, 10);
        let b = MonitorCheckpoint::new("m", 4, 0);
        let c = MonitorCheckpoint::new("m", 4, 2);

        assert_eq!(a.position_cmp(&b), Some(Ordering::Less));
        assert_eq!(c.position_cmp(&b), Some(Ordering::Greater));
        assert_eq!(b.position_cmp(&b.clone()), Some(Ordering::Equal));
        assert_eq!(a.position_cmp(&MonitorCheckpoint::new("other", 1, 1)), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(MonitorCheckpoint::new("docs", 7, 42).to_string(), "docs/7/42");
        assert_eq!(MonitorCheckpoint::initial("docs").to_string(), "docs/1/0");
    }
}
