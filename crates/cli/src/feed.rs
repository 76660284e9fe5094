//! Wiring of a configured feed: monitors, manager, state store and runner

use crate::system_config::SystemConfig;
use anyhow::{Context, Result};
use journal::{SledStateStore, TraversalStateStore};
use monitor::{DirectoryProducer, ManagerConfig, MonitorManager, SnapshotDir};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use traversal::{DocumentSink, HostLoadManager, TraversalDriver, TraversalRunner};

/// Sled database directory below the state dir
pub fn traversal_state_dir(state_dir: &Path) -> PathBuf {
    state_dir.join("traversal")
}

/// Snapshot directory of monitor `id`
pub fn snapshot_dir(state_dir: &Path, id: &str) -> SnapshotDir {
    SnapshotDir::new(state_dir.join("monitors").join(id))
}

/// Open the traversal state database
pub fn open_state(state_dir: &Path) -> Result<Arc<SledStateStore>> {
    let path = traversal_state_dir(state_dir);
    let store = SledStateStore::open(&path)
        .with_context(|| format!("Failed to open traversal state at {}", path.display()))?;
    Ok(Arc::new(store))
}

/// Build a manager with one directory monitor per configured entry
pub fn build_manager(config: &SystemConfig) -> Result<Arc<MonitorManager>> {
    let manager = MonitorManager::new(ManagerConfig {
        state_dir: config.feed.state_dir.clone(),
        queue_capacity: config.feed.queue_capacity,
    });

    for entry in &config.monitors {
        let mut producer = DirectoryProducer::new(&entry.root, &entry.exclude)
            .with_context(|| format!("Failed to set up monitor '{}'", entry.id))?;
        if let Some(limit) = entry.payload_limit {
            producer = producer.with_payloads(limit);
        }
        manager
            .add_monitor(entry.monitor_config(), Arc::new(producer))
            .with_context(|| format!("Failed to add monitor '{}'", entry.id))?;
    }

    Ok(Arc::new(manager))
}

/// A runnable feed
pub struct Feed {
    pub manager: Arc<MonitorManager>,
    pub state: Arc<SledStateStore>,
    pub load: Arc<HostLoadManager>,
    pub runner: TraversalRunner,
}

impl Feed {
    /// Assemble the feed and store the configured schedule for its target
    pub fn open(config: &SystemConfig, sink: Box<dyn DocumentSink>) -> Result<Self> {
        config.validate()?;
        if config.monitors.is_empty() {
            anyhow::bail!("No monitors configured; add a [[monitors]] entry (see `cf config --example`)");
        }

        let manager = build_manager(config)?;
        let state = open_state(&config.feed.state_dir)?;
        state
            .store_schedule(&config.traversal.schedule())
            .context("Failed to store traversal schedule")?;

        let load = Arc::new(
            HostLoadManager::new()
                .with_batch_size(config.traversal.batch_size)
                .with_default_load(config.traversal.load_per_minute),
        );

        let driver = TraversalDriver::new(Arc::clone(&manager), sink);
        let store: Arc<dyn TraversalStateStore> = state.clone();
        let runner = TraversalRunner::new(config.traversal.target.clone(), driver, Arc::clone(&load), store)
            .with_budget(config.traversal.batch_budget());

        Ok(Self {
            manager,
            state,
            load,
            runner,
        })
    }
}
