//! Persistence of traversal state: checkpoint tokens and per-target schedules

use chrono::Timelike;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sled::Db;
use std::collections::HashMap;
use std::path::Path;

const CHECKPOINT_PREFIX: &str = "checkpoint/";
const SCHEDULE_PREFIX: &str = "schedule/";

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("State database error: {0}")]
    Db(#[from] sled::Error),

    #[error("Corrupt state entry '{key}': {reason}")]
    Corrupt { key: String, reason: String },
}

/// Hours of the day (local time) during which a target may be traversed
///
/// `end_hour` is exclusive; a window with `start_hour > end_hour` wraps
/// past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl HourWindow {
    pub fn contains(&self, hour: u32) -> bool {
        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

/// Delivery schedule of one traversal target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// Traversal target name
    pub target: String,
    /// Maximum documents per minute
    pub load_per_minute: u32,
    /// Cooldown after a traversal finishes (milliseconds)
    pub retry_delay_ms: u64,
    /// Whether traversal is suspended
    pub disabled: bool,
    /// Enabled windows; empty means always enabled
    pub windows: Vec<HourWindow>,
}

impl Schedule {
    pub fn new(target: impl Into<String>, load_per_minute: u32) -> Self {
        Self {
            target: target.into(),
            load_per_minute,
            retry_delay_ms: 5 * 60 * 1000,
            disabled: false,
            windows: Vec::new(),
        }
    }

    /// Whether traversal may run during `hour` (0-23)
    pub fn is_active_at(&self, hour: u32) -> bool {
        !self.disabled && (self.windows.is_empty() || self.windows.iter().any(|w| w.contains(hour)))
    }

    /// Whether traversal may run right now (local time)
    pub fn is_active_now(&self) -> bool {
        self.is_active_at(chrono::Local::now().hour())
    }
}

/// Durable home of checkpoint tokens and schedules
pub trait TraversalStateStore: Send + Sync {
    fn load_checkpoint(&self, target: &str) -> Result<Option<String>, StateError>;
    fn store_checkpoint(&self, target: &str, token: &str) -> Result<(), StateError>;
    fn clear_checkpoint(&self, target: &str) -> Result<(), StateError>;
    fn load_schedule(&self, target: &str) -> Result<Option<Schedule>, StateError>;
    fn store_schedule(&self, schedule: &Schedule) -> Result<(), StateError>;
}

/// sled-backed state store
pub struct SledStateStore {
    db: Db,
}

impl SledStateStore {
    /// Open or create the state database under `dir`
    pub fn open(dir: &Path) -> Result<Self, StateError> {
        let db = sled::open(dir.join("state.db"))?;
        Ok(Self { db })
    }

    /// All stored schedules
    pub fn schedules(&self) -> Result<Vec<Schedule>, StateError> {
        let mut schedules = Vec::new();
        for item in self.db.scan_prefix(SCHEDULE_PREFIX) {
            let (key, value) = item?;
            schedules.push(decode_schedule(&String::from_utf8_lossy(&key), &value)?);
        }
        Ok(schedules)
    }
}

fn decode_schedule(key: &str, value: &[u8]) -> Result<Schedule, StateError> {
    bincode::deserialize(value).map_err(|e| StateError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

impl TraversalStateStore for SledStateStore {
    fn load_checkpoint(&self, target: &str) -> Result<Option<String>, StateError> {
        let key = format!("{}{}", CHECKPOINT_PREFIX, target);
        match self.db.get(&key)? {
            Some(value) => String::from_utf8(value.to_vec())
                .map(Some)
                .map_err(|e| StateError::Corrupt {
                    key,
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    fn store_checkpoint(&self, target: &str, token: &str) -> Result<(), StateError> {
        self.db
            .insert(format!("{}{}", CHECKPOINT_PREFIX, target), token.as_bytes())?;
        // Flush to ensure durability
        self.db.flush()?;
        Ok(())
    }

    fn clear_checkpoint(&self, target: &str) -> Result<(), StateError> {
        self.db.remove(format!("{}{}", CHECKPOINT_PREFIX, target))?;
        self.db.flush()?;
        Ok(())
    }

    fn load_schedule(&self, target: &str) -> Result<Option<Schedule>, StateError> {
        let key = format!("{}{}", SCHEDULE_PREFIX, target);
        match self.db.get(&key)? {
            Some(value) => decode_schedule(&key, &value).map(Some),
            None => Ok(None),
        }
    }

    fn store_schedule(&self, schedule: &Schedule) -> Result<(), StateError> {
        let key = format!("{}{}", SCHEDULE_PREFIX, schedule.target);
        let value = bincode::serialize(schedule).map_err(|e| StateError::Corrupt {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        self.db.insert(key, value)?;
        self.db.flush()?;
        Ok(())
    }
}

/// In-process state store for embedding and tests
#[derive(Default)]
pub struct MemoryStateStore {
    checkpoints: RwLock<HashMap<String, String>>,
    schedules: RwLock<HashMap<String, Schedule>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TraversalStateStore for MemoryStateStore {
    fn load_checkpoint(&self, target: &str) -> Result<Option<String>, StateError> {
        Ok(self.checkpoints.read().get(target).cloned())
    }

    fn store_checkpoint(&self, target: &str, token: &str) -> Result<(), StateError> {
        self.checkpoints
            .write()
            .insert(target.to_string(), token.to_string());
        Ok(())
    }

    fn clear_checkpoint(&self, target: &str) -> Result<(), StateError> {
        self.checkpoints.write().remove(target);
        Ok(())
    }

    fn load_schedule(&self, target: &str) -> Result<Option<Schedule>, StateError> {
        Ok(self.schedules.read().get(target).cloned())
    }

    fn store_schedule(&self, schedule: &Schedule) -> Result<(), StateError> {
        self.schedules
            .write()
            .insert(schedule.target.clone(), schedule.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_hour_windows() {
        let day = HourWindow { start_hour: 9, end_hour: 17 };
        assert!(day.contains(9));
        assert!(day.contains(16));
        assert!(!day.contains(17));

        let night = HourWindow { start_hour: 22, end_hour: 6 };
        assert!(night.contains(23));
        assert!(night.contains(0));
        assert!(!night.contains(12));
    }

    #[test]
    fn test_schedule_activity() {
        let mut schedule = Schedule::new("docs", 600);
        assert!(schedule.is_active_at(3));

        schedule.windows.push(HourWindow { start_hour: 1, end_hour: 5 });
        assert!(schedule.is_active_at(3));
        assert!(!schedule.is_active_at(12));

        schedule.disabled = true;
        assert!(!schedule.is_active_at(3));
    }

    #[test]
    fn test_sled_store_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();

        {
            let store = SledStateStore::open(temp_dir.path()).unwrap();
            assert!(store.load_checkpoint("docs").unwrap().is_none());

            store.store_checkpoint("docs", "{\"v\":2}").unwrap();
            let mut schedule = Schedule::new("docs", 120);
            schedule.windows.push(HourWindow { start_hour: 8, end_hour: 20 });
            store.store_schedule(&schedule).unwrap();
        }

        let store = SledStateStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.load_checkpoint("docs").unwrap().as_deref(), Some("{\"v\":2}"));

        let schedule = store.load_schedule("docs").unwrap().unwrap();
        assert_eq!(schedule.load_per_minute, 120);
        assert_eq!(schedule.windows.len(), 1);
        assert_eq!(store.schedules().unwrap().len(), 1);

        store.clear_checkpoint("docs").unwrap();
        assert!(store.load_checkpoint("docs").unwrap().is_none());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStateStore::new();
        store.store_checkpoint("t", "tok").unwrap();
        store.store_schedule(&Schedule::new("t", 10)).unwrap();

        assert_eq!(store.load_checkpoint("t").unwrap().as_deref(), Some("tok"));
        assert_eq!(store.load_schedule("t").unwrap().unwrap().load_per_minute, 10);
        assert!(store.load_schedule("other").unwrap().is_none());
    }
}
