//! Ordered, durable key→value store backing KSM and SCM metadata.
//!
//! The store keeps a `BTreeMap` in memory (total order is lexicographic on
//! bytes) and an append-only record log on disk. Every mutation appends one
//! JSON record line and fsyncs before it returns, so a success response
//! implies durability. A batch is a single record, which makes multi-key
//! mutations atomic across crash and replay: either the whole line made it
//! to disk or none of it did. A torn final line is discarded and truncated
//! on open; a malformed interior line means the log is corrupted.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum MetaStoreError {
    #[error("Failed to open store at {path}: {source}")]
    OpenFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error during {op}: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Store corrupted at record {line}: {reason}")]
    Corrupted { line: usize, reason: String },
}

pub type Result<T> = std::result::Result<T, MetaStoreError>;

/// One mutation inside a [`MetaStore::batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// On-disk record format. Keys and values are hex so that arbitrary bytes
/// survive the line-oriented JSON log.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum LogRecord {
    Put { k: String, v: String },
    Delete { k: String },
    Batch { ops: Vec<LogRecord> },
}

impl LogRecord {
    fn from_op(op: &StoreOp) -> Self {
        match op {
            StoreOp::Put { key, value } => LogRecord::Put {
                k: hex::encode(key),
                v: hex::encode(value),
            },
            StoreOp::Delete { key } => LogRecord::Delete {
                k: hex::encode(key),
            },
        }
    }

    fn apply(
        &self,
        map: &mut BTreeMap<Vec<u8>, Vec<u8>>,
        line: usize,
    ) -> Result<()> {
        match self {
            LogRecord::Put { k, v } => {
                map.insert(decode_hex(k, line)?, decode_hex(v, line)?);
            }
            LogRecord::Delete { k } => {
                map.remove(&decode_hex(k, line)?);
            }
            LogRecord::Batch { ops } => {
                for op in ops {
                    op.apply(map, line)?;
                }
            }
        }
        Ok(())
    }
}

fn decode_hex(data: &str, line: usize) -> Result<Vec<u8>> {
    hex::decode(data).map_err(|e| MetaStoreError::Corrupted {
        line,
        reason: format!("invalid hex: {}", e),
    })
}

struct Inner {
    map: BTreeMap<Vec<u8>, Vec<u8>>,
    file: File,
}

/// Durable ordered key→value store with prefix iteration and atomic batches.
#[derive(Clone)]
pub struct MetaStore {
    inner: Arc<RwLock<Inner>>,
    // Application-level lock handed to callers; independent of the map lock
    // so a holder can issue several store calls under one critical section.
    guard: Arc<RwLock<()>>,
    path: PathBuf,
}

impl MetaStore {
    /// Open (or create) a store, replaying the record log into memory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut map = BTreeMap::new();

        if path.exists() {
            let data = std::fs::read_to_string(&path).map_err(|source| {
                MetaStoreError::OpenFailed {
                    path: path.display().to_string(),
                    source,
                }
            })?;
            let mut valid_until = 0usize;
            let mut lines = data.split_inclusive('\n').enumerate().peekable();
            while let Some((idx, raw)) = lines.next() {
                let is_last = lines.peek().is_none();
                if !raw.ends_with('\n') {
                    // Unterminated tail: the append that wrote it never
                    // returned success, so it is safe to drop.
                    warn!(
                        path = %path.display(),
                        line = idx,
                        "discarding unterminated final record"
                    );
                    truncate_log(&path, valid_until as u64)?;
                    break;
                }
                let trimmed = raw.trim_end_matches('\n');
                if trimmed.is_empty() {
                    valid_until += raw.len();
                    continue;
                }
                match serde_json::from_str::<LogRecord>(trimmed) {
                    Ok(record) => {
                        record.apply(&mut map, idx)?;
                        valid_until += raw.len();
                    }
                    Err(e) if is_last => {
                        // Torn tail from a crash mid-append; drop it.
                        warn!(
                            path = %path.display(),
                            line = idx,
                            error = %e,
                            "discarding torn final record"
                        );
                        truncate_log(&path, valid_until as u64)?;
                        break;
                    }
                    Err(e) => {
                        return Err(MetaStoreError::Corrupted {
                            line: idx,
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }

        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .map_err(|source| MetaStoreError::OpenFailed {
                path: path.display().to_string(),
                source,
            })?;

        Ok(Self {
            inner: Arc::new(RwLock::new(Inner { map, file })),
            guard: Arc::new(RwLock::new(())),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durably write one entry; returns after fsync.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let op = StoreOp::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        };
        let mut inner = self.inner.write().expect("meta store lock poisoned");
        append_record(&mut inner.file, &LogRecord::from_op(&op))?;
        inner.map.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let inner = self.inner.read().expect("meta store lock poisoned");
        Ok(inner.map.get(key).cloned())
    }

    /// Remove an entry. Removing an absent key is a no-op.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let mut inner = self.inner.write().expect("meta store lock poisoned");
        if !inner.map.contains_key(key) {
            return Ok(());
        }
        let record = LogRecord::Delete {
            k: hex::encode(key),
        };
        append_record(&mut inner.file, &record)?;
        inner.map.remove(key);
        Ok(())
    }

    pub fn is_empty(&self) -> Result<bool> {
        let inner = self.inner.read().expect("meta store lock poisoned");
        Ok(inner.map.is_empty())
    }

    /// Apply a group of mutations atomically: one log record, one fsync.
    pub fn batch(&self, ops: Vec<StoreOp>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let record = LogRecord::Batch {
            ops: ops.iter().map(LogRecord::from_op).collect(),
        };
        let mut inner = self.inner.write().expect("meta store lock poisoned");
        append_record(&mut inner.file, &record)?;
        for op in ops {
            match op {
                StoreOp::Put { key, value } => {
                    inner.map.insert(key, value);
                }
                StoreOp::Delete { key } => {
                    inner.map.remove(&key);
                }
            }
        }
        Ok(())
    }

    /// Snapshot iterator over entries, optionally restricted to a prefix.
    /// The snapshot is taken at seek time; later writes are not observed.
    pub fn iter(&self, prefix: Option<&[u8]>) -> StoreIter {
        let inner = self.inner.read().expect("meta store lock poisoned");
        let entries: Vec<(Vec<u8>, Vec<u8>)> = match prefix {
            Some(p) => inner
                .map
                .range(p.to_vec()..)
                .take_while(|(k, _)| k.starts_with(p))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            None => inner
                .map
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        StoreIter { entries, pos: 0 }
    }

    /// Shared lock for callers composing multi-call read sections.
    pub fn read_lock(&self) -> RwLockReadGuard<'_, ()> {
        self.guard.read().expect("meta store guard poisoned")
    }

    /// Exclusive lock for callers composing multi-call write sections.
    pub fn write_lock(&self) -> RwLockWriteGuard<'_, ()> {
        self.guard.write().expect("meta store guard poisoned")
    }
}

fn append_record(file: &mut File, record: &LogRecord) -> Result<()> {
    let mut line = serde_json::to_string(record).map_err(|e| MetaStoreError::Io {
        op: "encode",
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
    })?;
    line.push('\n');
    file.write_all(line.as_bytes())
        .map_err(|source| MetaStoreError::Io {
            op: "append",
            source,
        })?;
    file.sync_data().map_err(|source| MetaStoreError::Io {
        op: "fsync",
        source,
    })
}

fn truncate_log(path: &Path, len: u64) -> Result<()> {
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|source| MetaStoreError::Io {
            op: "truncate",
            source,
        })?;
    file.set_len(len).map_err(|source| MetaStoreError::Io {
        op: "truncate",
        source,
    })
}

/// Finite snapshot iterator returned by [`MetaStore::iter`].
pub struct StoreIter {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    pos: usize,
}

impl StoreIter {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Iterator for StoreIter {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.entries.get(self.pos).cloned();
        if item.is_some() {
            self.pos += 1;
        }
        item
    }
}
