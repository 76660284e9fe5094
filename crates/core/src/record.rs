//! Snapshot records and the upstream sort/dedup stage

use crate::error::{CoreError, Result};
use crate::fingerprint::Fingerprint;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One item of a repository snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// Unique, sortable identity of the item
    pub id: String,
    /// Content fingerprint used to detect modifications
    pub fingerprint: Fingerprint,
    /// Optional payload carried through to the sink
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl SnapshotRecord {
    /// Create a record without payload
    pub fn new(id: impl Into<String>, fingerprint: impl Into<Fingerprint>) -> Self {
        Self {
            id: id.into(),
            fingerprint: fingerprint.into(),
            payload: None,
        }
    }

    /// Attach a payload
    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Encode the record as a frame payload
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| CoreError::CorruptRecord(e.to_string()))
    }

    /// Decode a record from a frame payload
    pub fn decode(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).map_err(|e| CoreError::CorruptRecord(e.to_string()))
    }
}

/// Ordering of record identities within a snapshot
///
/// The differencer must use the same ordering the snapshot was sorted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdOrdering {
    /// Plain byte order
    #[default]
    Lexicographic,
    /// Integer order; non-numeric ids sort after all numeric ids
    Numeric,
}

impl IdOrdering {
    /// Compare two identities
    ///
    /// Distinct strings never compare equal, so "01" and "1" stay distinct
    /// identities under numeric ordering.
    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        match self {
            Self::Lexicographic => a.cmp(b),
            Self::Numeric => match (a.parse::<i128>(), b.parse::<i128>()) {
                (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
                (Ok(_), Err(_)) => Ordering::Less,
                (Err(_), Ok(_)) => Ordering::Greater,
                (Err(_), Err(_)) => a.cmp(b),
            },
        }
    }
}

/// Sort records by identity and drop duplicates, keeping the last record
/// seen for each duplicate id
pub fn sort_and_dedup(mut records: Vec<SnapshotRecord>, ordering: IdOrdering) -> Vec<SnapshotRecord> {
    // Stable sort keeps duplicates in arrival order
    records.sort_by(|a, b| ordering.compare(&a.id, &b.id));

    let mut out: Vec<SnapshotRecord> = Vec::with_capacity(records.len());
    for record in records {
        match out.last_mut() {
            Some(last) if last.id == record.id => *last = record,
            _ => out.push(record),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_encoding() {
        let record = SnapshotRecord::new("doc-1", "abc").with_payload("title: hello");
        let encoded = record.encode().unwrap();
        assert_eq!(SnapshotRecord::decode(&encoded).unwrap(), record);

        // Payload is omitted when absent
        let bare = SnapshotRecord::new("doc-2", "def");
        assert!(!bare.encode().unwrap().contains("payload"));

        assert!(SnapshotRecord::decode("{not json").is_err());
    }

    #[test]
    fn test_numeric_ordering() {
        let ord = IdOrdering::Numeric;
        assert_eq!(ord.compare("2", "10"), Ordering::Less);
        assert_eq!(ord.compare("-5", "3"), Ordering::Less);
        assert_eq!(ord.compare("10", "abc"), Ordering::Less);
        assert_eq!(ord.compare("abc", "abd"), Ordering::Less);
        assert_ne!(ord.compare("01", "1"), Ordering::Equal);

        assert_eq!(IdOrdering::Lexicographic.compare("2", "10"), Ordering::Greater);
    }

    #[test]
    fn test_sort_and_dedup_keeps_last() {
        let records = vec![
            SnapshotRecord::new("b", "1"),
            SnapshotRecord::new("a", "1"),
            SnapshotRecord::new("b", "2"),
            SnapshotRecord::new("c", "1"),
            SnapshotRecord::new("b", "3"),
        ];

        let sorted = sort_and_dedup(records, IdOrdering::Lexicographic);
        let ids: Vec<_> = sorted.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(sorted[1].fingerprint, Fingerprint::new("3"));
    }

    #[test]
    fn test_sort_numeric_ids() {
        let records = vec![
            SnapshotRecord::new("100", "x"),
            SnapshotRecord::new("9", "x"),
            SnapshotRecord::new("20", "x"),
        ];

        let sorted = sort_and_dedup(records, IdOrdering::Numeric);
        let ids: Vec<_> = sorted.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["9", "20", "100"]);
    }
}
