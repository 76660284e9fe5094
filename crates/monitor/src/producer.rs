//! Repository enumeration
//!
//! A [`SnapshotProducer`] lists every item currently in a repository. The
//! monitor turns that listing into a snapshot file; producers never see
//! checkpoints or changes.

use crate::exclude::{ExcludeConfig, ExcludeRules};
use anyhow::{Context, Result};
use feed_core::{Fingerprint, IdOrdering, SnapshotRecord};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Lazily produced repository listing
pub type RecordStream<'a> = Box<dyn Iterator<Item = Result<SnapshotRecord>> + 'a>;

/// Enumerates the items of one repository
pub trait SnapshotProducer: Send + Sync {
    /// List every item currently present
    ///
    /// Errors are treated as transient: the scan is abandoned and retried at
    /// the next interval.
    fn records(&self) -> Result<RecordStream<'_>>;

    /// Id ordering of this repository's items
    fn ordering(&self) -> IdOrdering {
        IdOrdering::Lexicographic
    }

    /// Whether `records` already yields ids in ascending `ordering()` order
    ///
    /// Ordered producers are streamed straight into the snapshot file;
    /// everything else is collected and sorted first.
    fn is_ordered(&self) -> bool {
        false
    }
}

/// Producer over the files below a directory
///
/// Item ids are root-relative paths with `/` separators; fingerprints are
/// BLAKE3 digests of file contents.
pub struct DirectoryProducer {
    root: PathBuf,
    rules: ExcludeRules,
    payload_limit: Option<u64>,
}

impl DirectoryProducer {
    pub fn new(root: &Path, excludes: &ExcludeConfig) -> Result<Self> {
        let rules = ExcludeRules::load(root, excludes)
            .with_context(|| format!("Failed to load exclude rules for {}", root.display()))?;

        Ok(Self {
            root: root.to_path_buf(),
            rules,
            payload_limit: None,
        })
    }

    /// Attach UTF-8 file contents up to `limit` bytes as record payloads
    pub fn with_payloads(mut self, limit: u64) -> Self {
        self.payload_limit = Some(limit);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_for(&self, path: &Path, relative: &Path) -> Result<Option<SnapshotRecord>> {
        let fingerprint = match Fingerprint::of_file(path) {
            Ok(fingerprint) => fingerprint,
            Err(feed_core::CoreError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
                // Deleted between listing and hashing
                debug!("Skipping vanished file {}", path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let id = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let mut record = SnapshotRecord::new(id, fingerprint);

        if let Some(limit) = self.payload_limit {
            let len = std::fs::metadata(path)
                .with_context(|| format!("Failed to stat {}", path.display()))?
                .len();
            if len <= limit {
                if let Ok(text) = std::fs::read_to_string(path) {
                    record = record.with_payload(text);
                }
            }
        }

        Ok(Some(record))
    }
}

impl SnapshotProducer for DirectoryProducer {
    fn records(&self) -> Result<RecordStream<'_>> {
        if !self.root.is_dir() {
            anyhow::bail!("Monitored root {} is not a directory", self.root.display());
        }

        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(move |entry| match entry.path().strip_prefix(&self.root) {
                Ok(relative) if !relative.as_os_str().is_empty() => {
                    !self.rules.is_excluded(relative, entry.file_type().is_dir())
                }
                _ => true,
            });

        let stream = walker.filter_map(move |entry| {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e.into())),
            };
            if !entry.file_type().is_file() {
                return None;
            }

            let relative = match entry.path().strip_prefix(&self.root) {
                Ok(relative) => relative,
                Err(e) => return Some(Err(e.into())),
            };
            self.record_for(entry.path(), relative).transpose()
        });

        Ok(Box::new(stream))
    }
}

/// Producer over an in-memory item map
///
/// Useful for embedding repositories that already hold their items in
/// memory; also the fixture of choice in tests.
pub struct MemoryProducer {
    items: RwLock<BTreeMap<String, SnapshotRecord>>,
    failure: RwLock<Option<String>>,
}

impl MemoryProducer {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(BTreeMap::new()),
            failure: RwLock::new(None),
        }
    }

    /// Insert or replace an item
    pub fn upsert(&self, record: SnapshotRecord) {
        self.items.write().insert(record.id.clone(), record);
    }

    /// Remove an item; returns whether it existed
    pub fn remove(&self, id: &str) -> bool {
        self.items.write().remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Make every listing fail with `reason` until cleared with `None`
    pub fn set_failure(&self, reason: Option<String>) {
        *self.failure.write() = reason;
    }
}

impl Default for MemoryProducer {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotProducer for MemoryProducer {
    fn records(&self) -> Result<RecordStream<'_>> {
        if let Some(reason) = self.failure.read().clone() {
            anyhow::bail!(reason);
        }

        // BTreeMap iterates in byte order, which is the lexicographic ordering
        let items: Vec<_> = self.items.read().values().cloned().collect();
        Ok(Box::new(items.into_iter().map(Ok)))
    }

    fn is_ordered(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn ids(producer: &dyn SnapshotProducer) -> Vec<String> {
        let mut ids: Vec<_> = producer
            .records()
            .unwrap()
            .map(|r| r.unwrap().id)
            .collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_directory_producer_lists_files() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        fs::create_dir_all(root.join("guides/setup"))?;
        fs::write(root.join("index.md"), "home")?;
        fs::write(root.join("guides/setup/linux.md"), "apt install")?;
        fs::create_dir_all(root.join(".git"))?;
        fs::write(root.join(".git/HEAD"), "ref")?;

        let producer = DirectoryProducer::new(root, &ExcludeConfig::default())?;
        assert_eq!(ids(&producer), vec!["guides/setup/linux.md", "index.md"]);
        Ok(())
    }

    #[test]
    fn test_fingerprints_follow_content() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        fs::write(root.join("a.txt"), "one")?;

        let producer = DirectoryProducer::new(root, &ExcludeConfig::default())?;
        let first = producer.records()?.next().unwrap()?;

        fs::write(root.join("a.txt"), "two")?;
        let second = producer.records()?.next().unwrap()?;

        assert_eq!(first.fingerprint, Fingerprint::of_bytes(b"one"));
        assert_ne!(first.fingerprint, second.fingerprint);
        assert!(first.payload.is_none());
        Ok(())
    }

    #[test]
    fn test_payloads_respect_limit() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        fs::write(root.join("small.txt"), "tiny")?;
        fs::write(root.join("large.txt"), "x".repeat(100))?;

        let producer = DirectoryProducer::new(root, &ExcludeConfig::default())?.with_payloads(10);
        let mut records: Vec<_> = producer.records()?.collect::<Result<_>>()?;
        records.sort_by(|a, b| a.id.cmp(&b.id));

        assert_eq!(records[0].id, "large.txt");
        assert!(records[0].payload.is_none());
        assert_eq!(records[1].payload.as_deref(), Some("tiny"));
        Ok(())
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let producer =
            DirectoryProducer::new(&temp_dir.path().join("gone"), &ExcludeConfig::default()).unwrap();
        assert!(producer.records().is_err());
    }

    #[test]
    fn test_memory_producer() {
        let producer = MemoryProducer::new();
        producer.upsert(SnapshotRecord::new("b", "2"));
        producer.upsert(SnapshotRecord::new("a", "1"));
        assert_eq!(ids(&producer), vec!["a", "b"]);
        assert!(producer.is_ordered());

        assert!(producer.remove("a"));
        assert_eq!(producer.len(), 1);

        producer.set_failure(Some("backend offline".to_string()));
        assert!(producer.records().is_err());
        producer.set_failure(None);
        assert!(producer.records().is_ok());
    }
}
