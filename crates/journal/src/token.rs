//! Global checkpoint tokens handed to the caller
//!
//! The current encoding is a versioned JSON record:
//!
//! ```text
//! {"v":2,"monitors":{"docs":{"s":4,"o":17}},"queue":311}
//! ```
//!
//! Tokens written before versioning carried a single monitor position as
//! `monitor/snapshot/offset`; they still decode through the legacy path.

use feed_core::MonitorCheckpoint;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;

const CURRENT_VERSION: u64 = 2;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Malformed checkpoint token: {0}")]
    Malformed(String),

    #[error("Unsupported checkpoint token version {0}")]
    UnsupportedVersion(u64),
}

/// Resume point for a whole monitor manager
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GlobalCheckpoint {
    /// Last committed position of each monitor
    pub monitors: BTreeMap<String, MonitorCheckpoint>,
    /// Queue position of the most recently delivered change
    pub queue_position: u64,
}

#[derive(Serialize, Deserialize)]
struct Position {
    s: u64,
    o: u64,
}

#[derive(Serialize, Deserialize)]
struct TokenV2 {
    v: u64,
    monitors: BTreeMap<String, Position>,
    queue: u64,
}

impl GlobalCheckpoint {
    /// Build a checkpoint from committed monitor positions
    pub fn new(monitors: BTreeMap<String, MonitorCheckpoint>, queue_position: u64) -> Self {
        Self {
            monitors,
            queue_position,
        }
    }

    /// Position recorded for one monitor
    pub fn monitor(&self, id: &str) -> Option<&MonitorCheckpoint> {
        self.monitors.get(id)
    }

    /// Encode as an opaque token string
    pub fn encode(&self) -> String {
        let record = TokenV2 {
            v: CURRENT_VERSION,
            monitors: self
                .monitors
                .iter()
                .map(|(id, cp)| {
                    (
                        id.clone(),
                        Position {
                            s: cp.snapshot,
                            o: cp.offset,
                        },
                    )
                })
                .collect(),
            queue: self.queue_position,
        };
        // Serializing plain maps and integers cannot fail
        serde_json::to_string(&record).unwrap_or_default()
    }

    /// Decode a token produced by any supported version
    pub fn decode(token: &str) -> Result<Self, TokenError> {
        let token = token.trim();
        if token.starts_with('{') {
            let value: Value =
                serde_json::from_str(token).map_err(|e| TokenError::Malformed(e.to_string()))?;
            let version = value
                .get("v")
                .and_then(Value::as_u64)
                .ok_or_else(|| TokenError::Malformed("missing version discriminator".into()))?;

            return match version {
                2 => Self::decode_v2(value),
                other => Err(TokenError::UnsupportedVersion(other)),
            };
        }

        Self::decode_legacy(token)
    }

    fn decode_v2(value: Value) -> Result<Self, TokenError> {
        let record: TokenV2 =
            serde_json::from_value(value).map_err(|e| TokenError::Malformed(e.to_string()))?;
        let monitors = record
            .monitors
            .into_iter()
            .map(|(id, pos)| (id.clone(), MonitorCheckpoint::new(id, pos.s, pos.o)))
            .collect();
        Ok(Self::new(monitors, record.queue))
    }

    /// `monitor/snapshot/offset`; the monitor id may itself contain '/'
    fn decode_legacy(token: &str) -> Result<Self, TokenError> {
        let malformed = || TokenError::Malformed(format!("unrecognized token {:?}", token));

        let mut parts = token.rsplitn(3, '/');
        let offset = parts.next().and_then(|s| s.parse::<u64>().ok()).ok_or_else(malformed)?;
        let snapshot = parts.next().and_then(|s| s.parse::<u64>().ok()).ok_or_else(malformed)?;
        let monitor = parts.next().filter(|m| !m.is_empty()).ok_or_else(malformed)?;

        tracing::debug!("Decoded legacy checkpoint token for monitor '{}'", monitor);

        let mut monitors = BTreeMap::new();
        monitors.insert(
            monitor.to_string(),
            MonitorCheckpoint::new(monitor, snapshot, offset),
        );
        Ok(Self::new(monitors, 0))
    }
}

impl std::fmt::Display for GlobalCheckpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for GlobalCheckpoint {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> GlobalCheckpoint {
        let mut monitors = BTreeMap::new();
        monitors.insert("docs".to_string(), MonitorCheckpoint::new("docs", 4, 17));
        monitors.insert("wiki".to_string(), MonitorCheckpoint::new("wiki", 1, 0));
        GlobalCheckpoint::new(monitors, 311)
    }

    #[test]
    fn test_current_encoding() {
        let token = sample().encode();
        assert!(token.starts_with("{\"v\":2,"));
        assert_eq!(token.parse::<GlobalCheckpoint>().unwrap(), sample());
    }

    #[test]
    fn test_legacy_token_fallback() {
        let checkpoint = GlobalCheckpoint::decode("docs/4/17").unwrap();
        assert_eq!(checkpoint.queue_position, 0);
        assert_eq!(
            checkpoint.monitor("docs"),
            Some(&MonitorCheckpoint::new("docs", 4, 17))
        );

        let nested = GlobalCheckpoint::decode("team/docs/2/5").unwrap();
        assert_eq!(
            nested.monitor("team/docs"),
            Some(&MonitorCheckpoint::new("team/docs", 2, 5))
        );
    }

    #[test]
    fn test_rejects_bad_tokens() {
        assert!(matches!(
            GlobalCheckpoint::decode("{\"v\":9}"),
            Err(TokenError::UnsupportedVersion(9))
        ));
        assert!(GlobalCheckpoint::decode("{\"monitors\":{}}").is_err());
        assert!(GlobalCheckpoint::decode("{\"v\":2,\"monitors\":3,\"queue\":1}").is_err());
        assert!(GlobalCheckpoint::decode("docs/x/1").is_err());
        assert!(GlobalCheckpoint::decode("/1/2").is_err());
        assert!(GlobalCheckpoint::decode("").is_err());
    }

    #[test]
    fn test_empty_checkpoint() {
        let empty = GlobalCheckpoint::default();
        assert_eq!(GlobalCheckpoint::decode(&empty.encode()).unwrap(), empty);
    }
}
