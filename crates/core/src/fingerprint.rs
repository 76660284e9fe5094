//! Content fingerprints used to detect item changes cheaply

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::io::{BufReader, Read};
use std::path::Path;

/// Opaque, comparable content fingerprint
///
/// Producers may supply any stable string (a version tag, an ETag, a
/// modification stamp). The helpers below produce BLAKE3 hex digests.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap an opaque fingerprint value
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Fingerprint raw bytes with BLAKE3
    pub fn of_bytes(data: &[u8]) -> Self {
        Self(blake3::hash(data).to_hex().to_string())
    }

    /// Fingerprint a file with BLAKE3 (streaming for large files)
    pub fn of_file(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| CoreError::io(path, e))?;
        let mut reader = BufReader::new(file);
        let mut hasher = blake3::Hasher::new();

        let mut buffer = [0u8; 8192];
        loop {
            let bytes_read = reader.read(&mut buffer).map_err(|e| CoreError::io(path, e))?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(Self(hasher.finalize().to_hex().to_string()))
    }

    /// Get the fingerprint as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fingerprint({})", self.0)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Fingerprint {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_of_bytes_is_deterministic() {
        let a = Fingerprint::of_bytes(b"hello world");
        let b = Fingerprint::of_bytes(b"hello world");
        let c = Fingerprint::of_bytes(b"hello world!");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_of_file_matches_of_bytes() {
        let mut file = NamedTempFile::new().unwrap();
        let data = vec![7u8; 20_000];
        file.write_all(&data).unwrap();
        file.flush().unwrap();

        let from_file = Fingerprint::of_file(file.path()).unwrap();
        assert_eq!(from_file, Fingerprint::of_bytes(&data));
    }

    #[test]
    fn test_opaque_values_compare_by_content() {
        assert_eq!(Fingerprint::new("v1"), Fingerprint::from("v1"));
        assert_ne!(Fingerprint::new("v1"), Fingerprint::new("v2"));
    }
}
