//! Several monitors feeding one traversal

use anyhow::Result;
use feed_core::SnapshotRecord;
use journal::GlobalCheckpoint;
use monitor::{ManagerConfig, MemoryProducer, MonitorConfig, MonitorManager, MonitorState};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use traversal::{MemorySink, TraversalDriver};

const PER_MONITOR: usize = 30;

fn ids(prefix: &str) -> Vec<String> {
    (0..PER_MONITOR).map(|i| format!("{}-{:02}", prefix, i)).collect()
}

fn filled(prefix: &str) -> Arc<MemoryProducer> {
    let producer = Arc::new(MemoryProducer::new());
    for id in ids(prefix) {
        producer.upsert(SnapshotRecord::new(id, "v1"));
    }
    producer
}

fn open_pair(
    state: &Path,
    alpha: Arc<MemoryProducer>,
    beta: Arc<MemoryProducer>,
) -> Result<Arc<MonitorManager>> {
    let manager = Arc::new(MonitorManager::new(ManagerConfig::new(state)));
    let interval = Duration::from_millis(20);
    manager.add_monitor(MonitorConfig::new("alpha").with_scan_interval(interval), alpha)?;
    manager.add_monitor(MonitorConfig::new("beta").with_scan_interval(interval), beta)?;
    Ok(manager)
}

fn wait_for_queue(manager: &MonitorManager, len: usize) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while manager.queue_len() < len && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
}

fn from_monitor(sink: &MemorySink, monitor: &str) -> Vec<String> {
    sink.documents()
        .into_iter()
        .filter(|d| d.monitor == monitor)
        .map(|d| d.id)
        .collect()
}

#[test]
fn test_interleaved_monitors_resume_from_shared_token() -> Result<()> {
    let state = TempDir::new()?;

    let first = MemorySink::new();
    let token = {
        let manager = open_pair(state.path(), filled("a"), filled("b"))?;
        let mut driver = TraversalDriver::new(Arc::clone(&manager), Box::new(first.clone()));
        driver.start_traversal()?;
        wait_for_queue(&manager, 2 * PER_MONITOR);

        let mut token = None;
        for _ in 0..2 {
            let outcome = driver.run_batch(25)?;
            assert_eq!(outcome.count, 25);
            token = outcome.checkpoint;
        }
        driver.stop();
        token.expect("delivered batches produce a token")
    };

    let decoded = GlobalCheckpoint::decode(&token)?;
    assert!(decoded.monitor("alpha").is_some());
    assert!(decoded.monitor("beta").is_some());
    assert_eq!(decoded.queue_position, 50);

    let second = MemorySink::new();
    let manager = open_pair(state.path(), filled("a"), filled("b"))?;
    let mut driver = TraversalDriver::new(Arc::clone(&manager), Box::new(second.clone()));
    driver.resume_traversal(&token)?;
    wait_for_queue(&manager, 2 * PER_MONITOR - 50);
    while driver.run_batch(25)?.count > 0 {}

    // Each monitor's changes arrive in its own order with no gaps or repeats
    for (monitor, prefix) in [("alpha", "a"), ("beta", "b")] {
        let mut delivered = from_monitor(&first, monitor);
        delivered.extend(from_monitor(&second, monitor));
        assert_eq!(delivered, ids(prefix), "monitor {monitor}");
    }
    assert_eq!(first.len() + second.len(), 2 * PER_MONITOR);
    assert_eq!(second.documents()[0].sequence, 51);

    driver.stop();
    Ok(())
}

#[test]
fn test_failing_monitor_does_not_block_the_other() -> Result<()> {
    let state = TempDir::new()?;
    let alpha = Arc::new(MemoryProducer::new());
    alpha.set_failure(Some("backend offline".into()));
    let beta = filled("b");

    let manager = open_pair(state.path(), Arc::clone(&alpha), beta)?;
    let sink = MemorySink::new();
    let mut driver = TraversalDriver::new(Arc::clone(&manager), Box::new(sink.clone()));
    driver.start_traversal()?;
    wait_for_queue(&manager, PER_MONITOR);

    while driver.run_batch(10)?.count > 0 {}
    assert_eq!(sink.ids(), ids("b"));

    let status = manager.status();
    assert!(status.fault.is_none());
    let alpha_status = status
        .monitors
        .iter()
        .find(|m| m.id == "alpha")
        .expect("alpha is registered");
    assert_ne!(alpha_status.state, MonitorState::Faulted);
    assert!(alpha_status
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("backend offline")));
    assert!(manager.monitor_faults().is_empty());

    // Once the producer recovers its changes flow again
    alpha.set_failure(None);
    alpha.upsert(SnapshotRecord::new("a-00", "v1"));
    wait_for_queue(&manager, 1);
    let outcome = driver.run_batch(10)?;
    assert_eq!(outcome.count, 1);
    assert_eq!(from_monitor(&sink, "alpha"), vec!["a-00".to_string()]);

    driver.stop();
    Ok(())
}
