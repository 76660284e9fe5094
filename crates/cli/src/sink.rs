//! JSON-lines document output

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::Path;
use traversal::{DeliveryError, Document, DocumentSink};

/// Writes one JSON object per delivered document
pub struct JsonLinesSink {
    writer: Box<dyn Write + Send>,
}

impl JsonLinesSink {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self { writer }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    /// Append to `path`, creating it if needed
    pub fn append(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open output file {}", path.display()))?;
        Ok(Self::new(Box::new(BufWriter::new(file))))
    }
}

impl DocumentSink for JsonLinesSink {
    fn deliver(&mut self, document: &Document) -> Result<(), DeliveryError> {
        let line = serde_json::to_string(document).map_err(|e| DeliveryError::Rejected {
            id: document.id.clone(),
            reason: e.to_string(),
        })?;

        // Flush per document so a checkpointed document is never only buffered
        writeln!(self.writer, "{}", line)
            .and_then(|()| self.writer.flush())
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidData | ErrorKind::InvalidInput => DeliveryError::Rejected {
                    id: document.id.clone(),
                    reason: e.to_string(),
                },
                _ => DeliveryError::ResourceExhausted(e.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feed_core::ChangeKind;
    use tempfile::TempDir;

    fn document(id: &str, sequence: u64) -> Document {
        Document {
            id: id.to_string(),
            kind: ChangeKind::Upsert,
            payload: None,
            monitor: "docs".to_string(),
            sequence,
        }
    }

    #[test]
    fn test_appends_one_line_per_document() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("out/feed.jsonl");

        let mut sink = JsonLinesSink::append(&path).unwrap();
        sink.deliver(&document("a.txt", 1)).unwrap();
        sink.deliver(&document("b.txt", 2)).unwrap();
        drop(sink);

        let mut sink = JsonLinesSink::append(&path).unwrap();
        sink.deliver(&document("c.txt", 3)).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> =
            content.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["id"], "a.txt");
        assert_eq!(lines[0]["kind"], "upsert");
        assert_eq!(lines[2]["sequence"], 3);
        assert!(lines[0].get("payload").is_none());
    }

    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(ErrorKind::Other, "no space left on device"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_failure_is_resource_exhaustion() {
        let mut sink = JsonLinesSink::new(Box::new(FullDisk));
        assert!(matches!(
            sink.deliver(&document("a.txt", 1)),
            Err(DeliveryError::ResourceExhausted(_))
        ));
    }
}
