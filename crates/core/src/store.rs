//! Append-only snapshot files
//!
//! A snapshot file is a sequence of frames, one per record:
//!
//! ```text
//! <decimal-byte-length>#<utf8-payload>\n
//! ```
//!
//! Writers append to `<name>.tmp` and atomically rename on `finish()`, so a
//! snapshot visible under its final name is always complete.

use crate::error::{CoreError, Result};
use crate::record::SnapshotRecord;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Largest payload accepted by the frame decoder
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Longest length prefix accepted ("67108864" has 8 digits)
const MAX_LEN_DIGITS: usize = 10;

/// Encode a payload as one frame
pub fn encode_frame(payload: &str) -> String {
    format!("{}#{}\n", payload.len(), payload)
}

/// Decode a single standalone frame, returning its payload
pub fn decode_frame(frame: &str) -> Result<&str> {
    let corrupt = |reason: &str| CoreError::MalformedHandle(format!("{}: {:?}", reason, frame));

    let (len_str, rest) = frame.split_once('#').ok_or_else(|| corrupt("missing '#'"))?;
    let len: usize = parse_len(len_str).ok_or_else(|| corrupt("invalid length prefix"))?;
    let payload = rest.get(..len).ok_or_else(|| corrupt("truncated payload"))?;
    match &rest[len..] {
        "\n" | "" => Ok(payload),
        _ => Err(corrupt("trailing bytes after payload")),
    }
}

fn parse_len(digits: &str) -> Option<usize> {
    if digits.is_empty() || digits.len() > MAX_LEN_DIGITS || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().filter(|&len| len <= MAX_FRAME_LEN)
}

/// Handle to one complete snapshot file
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    /// Start writing a new snapshot that will appear at `path` once finished
    pub fn create(path: &Path, sync: bool) -> Result<SnapshotWriter> {
        SnapshotWriter::create(path, sync)
    }

    /// Open an existing, complete snapshot
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(CoreError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "snapshot not found"),
            ));
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Read the records in write order
    ///
    /// Every call starts a fresh pass over the file.
    pub fn read(&self) -> Result<SnapshotReader> {
        SnapshotReader::open(&self.path)
    }

    /// Path of the snapshot file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Appends records to a snapshot under construction
pub struct SnapshotWriter {
    target: PathBuf,
    tmp_path: PathBuf,
    writer: BufWriter<File>,
    sync: bool,
    records: u64,
}

impl SnapshotWriter {
    fn create(target: &Path, sync: bool) -> Result<Self> {
        let tmp_path = tmp_path_for(target);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(|e| CoreError::io(&tmp_path, e))?;

        Ok(Self {
            target: target.to_path_buf(),
            tmp_path,
            writer: BufWriter::new(file),
            sync,
            records: 0,
        })
    }

    /// Append one record, flushing (and optionally syncing) it
    pub fn write(&mut self, record: &SnapshotRecord) -> Result<()> {
        let frame = encode_frame(&record.encode()?);
        self.writer
            .write_all(frame.as_bytes())
            .and_then(|_| self.writer.flush())
            .map_err(|e| CoreError::io(&self.tmp_path, e))?;

        if self.sync {
            self.writer
                .get_ref()
                .sync_data()
                .map_err(|e| CoreError::io(&self.tmp_path, e))?;
        }

        self.records += 1;
        Ok(())
    }

    /// Number of records written so far
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Seal the snapshot and move it to its final name
    pub fn finish(mut self) -> Result<SnapshotStore> {
        self.writer
            .flush()
            .map_err(|e| CoreError::io(&self.tmp_path, e))?;
        self.writer
            .get_ref()
            .sync_all()
            .map_err(|e| CoreError::io(&self.tmp_path, e))?;

        std::fs::rename(&self.tmp_path, &self.target).map_err(|e| CoreError::io(&self.target, e))?;

        // Persist the rename itself
        #[cfg(unix)]
        if let Some(parent) = self.target.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        Ok(SnapshotStore {
            path: self.target.clone(),
        })
    }
}

fn tmp_path_for(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    target.with_file_name(name)
}

/// Lazy iterator over the records of a snapshot file
pub struct SnapshotReader {
    path: PathBuf,
    reader: BufReader<File>,
    offset: u64,
    failed: bool,
}

impl SnapshotReader {
    fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| CoreError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            offset: 0,
            failed: false,
        })
    }

    fn corrupt(&self, reason: impl Into<String>) -> CoreError {
        CoreError::CorruptFrame {
            path: self.path.clone(),
            offset: self.offset,
            reason: reason.into(),
        }
    }

    fn next_frame(&mut self) -> Result<Option<String>> {
        let mut prefix = Vec::with_capacity(MAX_LEN_DIGITS + 1);
        let read = self
            .reader
            .by_ref()
            .take(MAX_LEN_DIGITS as u64 + 1)
            .read_until(b'#', &mut prefix)
            .map_err(|e| CoreError::io(&self.path, e))?;

        if read == 0 {
            return Ok(None);
        }
        if prefix.last() != Some(&b'#') {
            return Err(self.corrupt("missing or oversized length prefix"));
        }

        let len = std::str::from_utf8(&prefix[..prefix.len() - 1])
            .ok()
            .and_then(parse_len)
            .ok_or_else(|| self.corrupt("invalid length prefix"))?;

        let mut body = vec![0u8; len + 1];
        self.reader.read_exact(&mut body).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                self.corrupt("truncated frame")
            } else {
                CoreError::io(&self.path, e)
            }
        })?;

        if body.pop() != Some(b'\n') {
            return Err(self.corrupt("frame not newline-terminated"));
        }

        let payload = String::from_utf8(body).map_err(|_| self.corrupt("payload is not UTF-8"))?;
        self.offset += (read + len + 1) as u64;
        Ok(Some(payload))
    }
}

impl Iterator for SnapshotReader {
    type Item = Result<SnapshotRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        let item = match self.next_frame() {
            Ok(Some(payload)) => SnapshotRecord::decode(&payload),
            Ok(None) => return None,
            Err(e) => Err(e),
        };

        if item.is_err() {
            self.failed = true;
        }
        Some(item)
    }
}
