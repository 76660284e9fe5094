//! Changes and their self-contained handle encoding
//!
//! A change handle serializes to a JSON object tagged by `kind`. The built-in
//! `delete` kind is structured (`{"kind":"delete","documentId":"..."}`); any
//! other kind carries an opaque `data` string that is turned back into a
//! handle by the factory registered for its tag.

use crate::checkpoint::MonitorCheckpoint;
use crate::diff::DiffEvent;
use crate::error::{CoreError, Result};
use crate::record::SnapshotRecord;
use crate::store::{decode_frame, encode_frame};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Tag of the built-in delete kind
pub const DELETE_KIND: &str = "delete";

/// Tag of the built-in snapshot-record upsert kind
pub const RECORD_KIND: &str = "record";

/// What a change does to the downstream index
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Add or replace the document
    Upsert,
    /// Remove the document
    Delete,
}

/// A reconstitutable reference to one changed document
pub trait DocumentHandle: Send + Sync + std::fmt::Debug {
    /// Tag used to find the decoding factory
    fn kind_tag(&self) -> &str;

    /// Identity of the document
    fn document_id(&self) -> &str;

    /// Effect on the index
    fn kind(&self) -> ChangeKind {
        ChangeKind::Upsert
    }

    /// Content forwarded to the sink, if any
    fn payload(&self) -> Option<&str> {
        None
    }

    /// Opaque encoding understood by this kind's factory
    fn encode_data(&self) -> Result<String>;
}

/// Decodes the opaque data of one handle kind
pub trait HandleFactory: Send + Sync {
    fn decode(&self, data: &str) -> Result<Arc<dyn DocumentHandle>>;
}

impl<F> HandleFactory for F
where
    F: Fn(&str) -> Result<Arc<dyn DocumentHandle>> + Send + Sync,
{
    fn decode(&self, data: &str) -> Result<Arc<dyn DocumentHandle>> {
        self(data)
    }
}

/// Handle for a removed document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteHandle {
    pub document_id: String,
}

impl DocumentHandle for DeleteHandle {
    fn kind_tag(&self) -> &str {
        DELETE_KIND
    }

    fn document_id(&self) -> &str {
        &self.document_id
    }

    fn kind(&self) -> ChangeKind {
        ChangeKind::Delete
    }

    fn encode_data(&self) -> Result<String> {
        Ok(self.document_id.clone())
    }
}

/// Handle for a new or modified snapshot record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHandle {
    pub record: SnapshotRecord,
}

impl DocumentHandle for RecordHandle {
    fn kind_tag(&self) -> &str {
        RECORD_KIND
    }

    fn document_id(&self) -> &str {
        &self.record.id
    }

    fn payload(&self) -> Option<&str> {
        self.record.payload.as_deref()
    }

    fn encode_data(&self) -> Result<String> {
        self.record.encode()
    }
}

struct RecordHandleFactory;

impl HandleFactory for RecordHandleFactory {
    fn decode(&self, data: &str) -> Result<Arc<dyn DocumentHandle>> {
        Ok(Arc::new(RecordHandle {
            record: SnapshotRecord::decode(data)?,
        }))
    }
}

/// Factory table keyed by kind tag, consulted at decode time
#[derive(Clone)]
pub struct HandleRegistry {
    factories: AHashMap<String, Arc<dyn HandleFactory>>,
}

impl HandleRegistry {
    /// Registry with the built-in `record` kind
    pub fn new() -> Self {
        let mut registry = Self {
            factories: AHashMap::new(),
        };
        registry.register(RECORD_KIND, RecordHandleFactory);
        registry
    }

    /// Register (or replace) the factory for a kind tag
    ///
    /// The `delete` tag is structural and cannot be overridden.
    pub fn register(&mut self, tag: impl Into<String>, factory: impl HandleFactory + 'static) {
        let tag = tag.into();
        if tag == DELETE_KIND {
            tracing::warn!("Ignoring factory registration for built-in '{}' kind", DELETE_KIND);
            return;
        }
        self.factories.insert(tag, Arc::new(factory));
    }

    /// Whether a factory exists for `tag`
    pub fn contains(&self, tag: &str) -> bool {
        tag == DELETE_KIND || self.factories.contains_key(tag)
    }

    /// Serialize a handle to its tagged JSON form
    pub fn encode_handle(&self, handle: &dyn DocumentHandle) -> Result<Value> {
        if handle.kind_tag() == DELETE_KIND {
            return Ok(json!({ "kind": DELETE_KIND, "documentId": handle.document_id() }));
        }
        Ok(json!({ "kind": handle.kind_tag(), "data": handle.encode_data()? }))
    }

    /// Rebuild a handle from its tagged JSON form
    pub fn decode_handle(&self, value: &Value) -> Result<Arc<dyn DocumentHandle>> {
        let object = value
            .as_object()
            .ok_or_else(|| CoreError::MalformedHandle("handle is not an object".into()))?;
        let tag = string_field(object, "kind")?;

        if tag == DELETE_KIND {
            return Ok(Arc::new(DeleteHandle {
                document_id: string_field(object, "documentId")?.to_string(),
            }));
        }

        let factory = self
            .factories
            .get(tag)
            .ok_or_else(|| CoreError::UnknownKind(tag.to_string()))?;
        factory.decode(string_field(object, "data")?)
    }
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn string_field<'a>(object: &'a Map<String, Value>, field: &str) -> Result<&'a str> {
    object
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::MalformedHandle(format!("missing string field '{}'", field)))
}

/// A detected change together with the checkpoint valid right after it
#[derive(Debug, Clone)]
pub struct Change {
    handle: Arc<dyn DocumentHandle>,
    checkpoint: MonitorCheckpoint,
}

impl Change {
    /// Create a change from an arbitrary handle
    pub fn new(handle: Arc<dyn DocumentHandle>, checkpoint: MonitorCheckpoint) -> Self {
        Self { handle, checkpoint }
    }

    /// Create a change from a differencer event
    pub fn from_event(event: DiffEvent, checkpoint: MonitorCheckpoint) -> Self {
        let handle: Arc<dyn DocumentHandle> = match event {
            DiffEvent::Upsert(record) => Arc::new(RecordHandle { record }),
            DiffEvent::Delete(document_id) => Arc::new(DeleteHandle { document_id }),
        };
        Self::new(handle, checkpoint)
    }

    pub fn kind(&self) -> ChangeKind {
        self.handle.kind()
    }

    pub fn document_id(&self) -> &str {
        self.handle.document_id()
    }

    pub fn handle(&self) -> &Arc<dyn DocumentHandle> {
        &self.handle
    }

    pub fn checkpoint(&self) -> &MonitorCheckpoint {
        &self.checkpoint
    }

    /// Serialize to one self-contained frame
    pub fn encode(&self, registry: &HandleRegistry) -> Result<String> {
        let value = json!({
            "handle": registry.encode_handle(self.handle.as_ref())?,
            "checkpoint": self.checkpoint,
        });
        Ok(encode_frame(&value.to_string()))
    }

    /// Rebuild a change from a frame produced by [`Change::encode`]
    pub fn decode(frame: &str, registry: &HandleRegistry) -> Result<Self> {
        let payload = decode_frame(frame)?;
        let value: Value = serde_json::from_str(payload)
            .map_err(|e| CoreError::MalformedHandle(e.to_string()))?;

        let handle = registry.decode_handle(
            value
                .get("handle")
                .ok_or_else(|| CoreError::MalformedHandle("missing 'handle'".into()))?,
        )?;
        let checkpoint: MonitorCheckpoint = serde_json::from_value(
            value
                .get("checkpoint")
                .cloned()
                .ok_or_else(|| CoreError::MalformedHandle("missing 'checkpoint'".into()))?,
        )
        .map_err(|e| CoreError::MalformedHandle(e.to_string()))?;

        Ok(Self { handle, checkpoint })
    }
}
