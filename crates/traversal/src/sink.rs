//! Downstream document sink

use feed_core::ChangeKind;
use journal::QueuedChange;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

/// A finalized document handed to the sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Document {
    pub id: String,
    pub kind: ChangeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    /// Monitor that observed the change
    pub monitor: String,
    /// Queue position of the change
    pub sequence: u64,
}

impl Document {
    pub fn from_queued(queued: &QueuedChange) -> Self {
        let change = &queued.change;
        Self {
            id: change.document_id().to_string(),
            kind: change.kind(),
            payload: change.handle().payload().map(str::to_string),
            monitor: change.checkpoint().monitor.clone(),
            sequence: queued.sequence,
        }
    }
}

/// Per-document delivery failures
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// This document cannot be indexed; the batch moves on
    #[error("Document '{id}' rejected: {reason}")]
    Rejected { id: String, reason: String },

    /// The sink cannot take anything more right now
    #[error("Sink resources exhausted: {0}")]
    ResourceExhausted(String),
}

/// Destination of delivered documents
pub trait DocumentSink: Send {
    fn deliver(&mut self, document: &Document) -> Result<(), DeliveryError>;
}

/// Sink that keeps every document in memory
///
/// Clones share the same document list.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    documents: Arc<Mutex<Vec<Document>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn documents(&self) -> Vec<Document> {
        self.documents.lock().clone()
    }

    pub fn ids(&self) -> Vec<String> {
        self.documents.lock().iter().map(|d| d.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.documents.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.lock().is_empty()
    }
}

impl DocumentSink for MemorySink {
    fn deliver(&mut self, document: &Document) -> Result<(), DeliveryError> {
        self.documents.lock().push(document.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feed_core::{Change, DiffEvent, MonitorCheckpoint, SnapshotRecord};

    #[test]
    fn test_document_from_queued_change() {
        let record = SnapshotRecord::new("guide.md", "f1").with_payload("# Guide");
        let queued = QueuedChange {
            sequence: 9,
            change: Change::from_event(DiffEvent::Upsert(record), MonitorCheckpoint::new("docs", 2, 1)),
        };

        let document = Document::from_queued(&queued);
        assert_eq!(document.id, "guide.md");
        assert_eq!(document.kind, ChangeKind::Upsert);
        assert_eq!(document.payload.as_deref(), Some("# Guide"));
        assert_eq!(document.monitor, "docs");
        assert_eq!(document.sequence, 9);
    }

    #[test]
    fn test_memory_sink_clones_share_documents() {
        let sink = MemorySink::new();
        let mut writer = sink.clone();
        let queued = QueuedChange {
            sequence: 1,
            change: Change::from_event(DiffEvent::Delete("old".into()), MonitorCheckpoint::new("m", 1, 1)),
        };

        writer.deliver(&Document::from_queued(&queued)).unwrap();
        assert_eq!(sink.ids(), vec!["old"]);
        assert_eq!(sink.documents()[0].kind, ChangeKind::Delete);
    }
}
