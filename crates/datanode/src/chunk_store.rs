//! On-disk container storage for a datanode.
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/<container>/container.json   container metadata
//! <root>/<container>/keys.json        key name → KeyData table
//! <root>/<container>/chunks/<name>    one file per chunk
//! ```
//!
//! Chunk files are fsync'd on write; the key table is rewritten through a
//! temp file and rename so a crash never leaves a half-written table.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use common::{unix_timestamp, ChunkInfo, DeletedBlocksTransaction, KeyData};
use protocol::container::ContainerStatus;
use protocol::datanode::ContainerReportEntry;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ContainerError;

type Result<T> = std::result::Result<T, ContainerError>;

#[derive(Debug, Serialize, Deserialize)]
struct ContainerMeta {
    container_name: String,
    created_at: u64,
}

pub struct ContainerStore {
    root: PathBuf,
    // One lock for the whole store: operations are short and local disks are
    // the bottleneck, not the lock.
    lock: Mutex<()>,
}

impl ContainerStore {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| ContainerError::io("create store root", e))?;
        Ok(Self {
            root,
            lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn container_dir(&self, container_name: &str) -> Result<PathBuf> {
        validate_name(container_name)?;
        Ok(self.root.join(container_name))
    }

    pub fn create_container(&self, container_name: &str) -> Result<()> {
        let _guard = self.lock.lock().expect("container store lock poisoned");
        let dir = self.container_dir(container_name)?;
        if dir.exists() {
            return Err(ContainerError::ContainerExists(container_name.to_string()));
        }
        fs::create_dir_all(dir.join("chunks"))
            .map_err(|e| ContainerError::io("create container", e))?;
        let meta = ContainerMeta {
            container_name: container_name.to_string(),
            created_at: unix_timestamp(),
        };
        write_json_atomic(&dir.join("container.json"), &meta)?;
        write_json_atomic::<BTreeMap<String, KeyData>>(&dir.join("keys.json"), &BTreeMap::new())?;
        debug!(container = container_name, "container created");
        Ok(())
    }

    pub fn read_container(&self, container_name: &str) -> Result<ContainerStatus> {
        let _guard = self.lock.lock().expect("container store lock poisoned");
        let keys = self.load_keys(container_name)?;
        Ok(ContainerStatus {
            container_name: container_name.to_string(),
            key_count: keys.len() as u64,
            used_bytes: keys.values().map(|k| k.total_len()).sum(),
        })
    }

    /// Remove a container. A non-empty container is only removed with
    /// `force`; removing an absent container succeeds.
    pub fn delete_container(&self, container_name: &str, force: bool) -> Result<()> {
        let _guard = self.lock.lock().expect("container store lock poisoned");
        let dir = self.container_dir(container_name)?;
        if !dir.exists() {
            return Ok(());
        }
        if !force {
            let keys = self.load_keys(container_name)?;
            if !keys.is_empty() {
                return Err(ContainerError::ContainerNotEmpty(
                    container_name.to_string(),
                ));
            }
        }
        fs::remove_dir_all(&dir).map_err(|e| ContainerError::io("delete container", e))?;
        debug!(container = container_name, force, "container deleted");
        Ok(())
    }

    /// Persist one chunk, verifying length and checksum before the write.
    pub fn write_chunk(
        &self,
        container_name: &str,
        chunk: &ChunkInfo,
        data: &[u8],
    ) -> Result<()> {
        if chunk.len != data.len() as u64 {
            return Err(ContainerError::InvalidRequest(format!(
                "chunk {} declares {} bytes but carries {}",
                chunk.chunk_name,
                chunk.len,
                data.len()
            )));
        }
        if !chunk.checksum.is_empty() {
            let computed = blake3::hash(data).to_hex().to_string();
            if computed != chunk.checksum {
                return Err(ContainerError::ChecksumMismatch {
                    chunk: chunk.chunk_name.clone(),
                    expected: chunk.checksum.clone(),
                    computed,
                });
            }
        }

        let _guard = self.lock.lock().expect("container store lock poisoned");
        let dir = self.container_dir(container_name)?;
        if !dir.exists() {
            return Err(ContainerError::ContainerNotFound(
                container_name.to_string(),
            ));
        }
        let path = dir.join("chunks").join(sanitize(&chunk.chunk_name));
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| ContainerError::io("open chunk", e))?;
        file.write_all(data)
            .map_err(|e| ContainerError::io("write chunk", e))?;
        file.sync_data()
            .map_err(|e| ContainerError::io("fsync chunk", e))?;
        Ok(())
    }

    pub fn read_chunk(&self, container_name: &str, chunk: &ChunkInfo) -> Result<Vec<u8>> {
        let _guard = self.lock.lock().expect("container store lock poisoned");
        let dir = self.container_dir(container_name)?;
        if !dir.exists() {
            return Err(ContainerError::ContainerNotFound(
                container_name.to_string(),
            ));
        }
        let path = dir.join("chunks").join(sanitize(&chunk.chunk_name));
        if !path.exists() {
            return Err(ContainerError::ChunkNotFound(chunk.chunk_name.clone()));
        }
        fs::read(&path).map_err(|e| ContainerError::io("read chunk", e))
    }

    /// Commit a key's chunk list.
    pub fn put_key(&self, key_data: &KeyData) -> Result<()> {
        let _guard = self.lock.lock().expect("container store lock poisoned");
        let mut keys = self.load_keys(&key_data.container_name)?;
        keys.insert(key_data.name.clone(), key_data.clone());
        self.save_keys(&key_data.container_name, &keys)
    }

    pub fn get_key(&self, container_name: &str, key_name: &str) -> Result<KeyData> {
        let _guard = self.lock.lock().expect("container store lock poisoned");
        let keys = self.load_keys(container_name)?;
        keys.get(key_name)
            .cloned()
            .ok_or_else(|| ContainerError::KeyNotFound(key_name.to_string()))
    }

    /// Remove a key and its chunk files. Removing an absent key succeeds so
    /// redelivered deletion transactions stay harmless.
    pub fn delete_key(&self, container_name: &str, key_name: &str) -> Result<()> {
        let _guard = self.lock.lock().expect("container store lock poisoned");
        let dir = self.container_dir(container_name)?;
        if !dir.exists() {
            return Ok(());
        }
        let mut keys = self.load_keys(container_name)?;
        let Some(key_data) = keys.remove(key_name) else {
            return Ok(());
        };
        self.save_keys(container_name, &keys)?;
        for chunk in &key_data.chunks {
            let path = dir.join("chunks").join(sanitize(&chunk.chunk_name));
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(chunk = %chunk.chunk_name, error = %e, "failed to remove chunk file");
                }
            }
        }
        debug!(container = container_name, key = key_name, "key deleted");
        Ok(())
    }

    /// Single round-trip write: one chunk plus the key commit.
    pub fn put_small_file(
        &self,
        key_data: &KeyData,
        chunk: &ChunkInfo,
        data: &[u8],
    ) -> Result<()> {
        self.write_chunk(&key_data.container_name, chunk, data)?;
        self.put_key(key_data)
    }

    /// Single round-trip read: the key's chunks concatenated.
    pub fn get_small_file(
        &self,
        container_name: &str,
        key_name: &str,
    ) -> Result<(KeyData, Vec<u8>)> {
        let key_data = self.get_key(container_name, key_name)?;
        let mut data = Vec::with_capacity(key_data.total_len() as usize);
        for chunk in &key_data.chunks {
            data.extend_from_slice(&self.read_chunk(container_name, chunk)?);
        }
        Ok((key_data, data))
    }

    /// Apply deletion transactions received via heartbeat commands.
    pub fn apply_delete_transactions(&self, transactions: &[DeletedBlocksTransaction]) {
        for tx in transactions {
            for block_key in &tx.block_keys {
                if let Err(e) = self.delete_key(&tx.container_name, block_key) {
                    warn!(
                        tx_id = tx.tx_id,
                        container = %tx.container_name,
                        block = %block_key,
                        error = %e,
                        "block deletion failed"
                    );
                }
            }
        }
    }

    /// Summary of local containers for registration reports.
    pub fn container_report(&self) -> Result<Vec<ContainerReportEntry>> {
        let _guard = self.lock.lock().expect("container store lock poisoned");
        let mut report = Vec::new();
        let entries =
            fs::read_dir(&self.root).map_err(|e| ContainerError::io("scan store root", e))?;
        for entry in entries {
            let entry = entry.map_err(|e| ContainerError::io("scan store root", e))?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let keys = match self.load_keys(&name) {
                Ok(keys) => keys,
                Err(_) => continue,
            };
            report.push(ContainerReportEntry {
                container_name: name,
                used_bytes: keys.values().map(|k| k.total_len()).sum(),
                key_count: keys.len() as u64,
            });
        }
        Ok(report)
    }

    /// Bytes held across all containers; feeds the heartbeat node stat.
    pub fn used_bytes(&self) -> u64 {
        self.container_report()
            .map(|r| r.iter().map(|c| c.used_bytes).sum())
            .unwrap_or(0)
    }

    fn load_keys(&self, container_name: &str) -> Result<BTreeMap<String, KeyData>> {
        let dir = self.container_dir(container_name)?;
        let path = dir.join("keys.json");
        if !path.exists() {
            return Err(ContainerError::ContainerNotFound(
                container_name.to_string(),
            ));
        }
        let data = fs::read_to_string(&path).map_err(|e| ContainerError::io("read keys", e))?;
        serde_json::from_str(&data).map_err(|e| {
            ContainerError::io(
                "parse keys",
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })
    }

    fn save_keys(&self, container_name: &str, keys: &BTreeMap<String, KeyData>) -> Result<()> {
        let dir = self.container_dir(container_name)?;
        write_json_atomic(&dir.join("keys.json"), keys)
    }
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let json = serde_json::to_string_pretty(value).map_err(|e| {
        ContainerError::io(
            "encode json",
            std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        )
    })?;
    let mut file = File::create(&tmp).map_err(|e| ContainerError::io("create temp", e))?;
    file.write_all(json.as_bytes())
        .map_err(|e| ContainerError::io("write temp", e))?;
    file.sync_data()
        .map_err(|e| ContainerError::io("fsync temp", e))?;
    fs::rename(&tmp, path).map_err(|e| ContainerError::io("rename", e))
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name.contains("..") {
        return Err(ContainerError::InvalidRequest(format!(
            "invalid container name: {:?}",
            name
        )));
    }
    Ok(())
}

/// Chunk names carry block keys (`nanos:uuid_chunk_N`); keep the file name
/// shell- and filesystem-safe.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn store(tag: &str) -> ContainerStore {
        let root = std::env::temp_dir().join(format!("ozone-dn-{}-{}", tag, Uuid::new_v4()));
        ContainerStore::open(root).unwrap()
    }

    fn chunk(name: &str, offset: u64, data: &[u8]) -> ChunkInfo {
        ChunkInfo {
            chunk_name: name.to_string(),
            offset,
            len: data.len() as u64,
            checksum: blake3::hash(data).to_hex().to_string(),
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn container_lifecycle() {
        let store = store("lifecycle");
        store.create_container("c1").unwrap();
        assert!(matches!(
            store.create_container("c1"),
            Err(ContainerError::ContainerExists(_))
        ));

        let status = store.read_container("c1").unwrap();
        assert_eq!(status.key_count, 0);

        store.delete_container("c1", false).unwrap();
        // Idempotent on an absent container.
        store.delete_container("c1", false).unwrap();
        let _ = fs::remove_dir_all(store.root());
    }

    #[test]
    fn chunk_write_read_round_trip() {
        let store = store("chunks");
        store.create_container("c1").unwrap();

        let payload = vec![0xAB; 4096];
        let info = chunk("k1_chunk_0", 0, &payload);
        store.write_chunk("c1", &info, &payload).unwrap();
        assert_eq!(store.read_chunk("c1", &info).unwrap(), payload);

        let missing = chunk("k1_chunk_9", 0, b"x");
        assert!(matches!(
            store.read_chunk("c1", &missing),
            Err(ContainerError::ChunkNotFound(_))
        ));
        let _ = fs::remove_dir_all(store.root());
    }

    #[test]
    fn corrupted_chunk_payload_is_rejected() {
        let store = store("checksum");
        store.create_container("c1").unwrap();

        let payload = b"expected contents".to_vec();
        let info = chunk("k1_chunk_0", 0, &payload);

        // Declared length disagrees with the payload.
        let err = store.write_chunk("c1", &info, b"short").unwrap_err();
        assert!(matches!(err, ContainerError::InvalidRequest(_)));

        // Same length, different bytes: caught by the checksum.
        let err = store
            .write_chunk("c1", &info, b"tampered contents")
            .unwrap_err();
        assert!(matches!(err, ContainerError::ChecksumMismatch { .. }));
        let _ = fs::remove_dir_all(store.root());
    }

    #[test]
    fn key_table_survives_and_deletes_cleanly() {
        let store = store("keys");
        store.create_container("c1").unwrap();

        let payload = vec![7u8; 128];
        let info = chunk("1234:abcd_chunk_0", 0, &payload);
        store.write_chunk("c1", &info, &payload).unwrap();
        let key_data = KeyData {
            container_name: "c1".to_string(),
            name: "1234:abcd".to_string(),
            chunks: vec![info],
            metadata: BTreeMap::new(),
        };
        store.put_key(&key_data).unwrap();

        assert_eq!(store.get_key("c1", "1234:abcd").unwrap(), key_data);
        let status = store.read_container("c1").unwrap();
        assert_eq!(status.key_count, 1);
        assert_eq!(status.used_bytes, 128);

        assert!(matches!(
            store.delete_container("c1", false),
            Err(ContainerError::ContainerNotEmpty(_))
        ));

        store.delete_key("c1", "1234:abcd").unwrap();
        store.delete_key("c1", "1234:abcd").unwrap();
        assert!(matches!(
            store.get_key("c1", "1234:abcd"),
            Err(ContainerError::KeyNotFound(_))
        ));
        store.delete_container("c1", false).unwrap();
        let _ = fs::remove_dir_all(store.root());
    }

    #[test]
    fn small_file_round_trip() {
        let store = store("small");
        store.create_container("c1").unwrap();

        let payload = b"tiny payload".to_vec();
        let info = chunk("k_chunk_0", 0, &payload);
        let key_data = KeyData {
            container_name: "c1".to_string(),
            name: "k".to_string(),
            chunks: vec![info.clone()],
            metadata: BTreeMap::new(),
        };
        store.put_small_file(&key_data, &info, &payload).unwrap();

        let (read_key, read_data) = store.get_small_file("c1", "k").unwrap();
        assert_eq!(read_key, key_data);
        assert_eq!(read_data, payload);
        let _ = fs::remove_dir_all(store.root());
    }

    #[test]
    fn delete_transactions_are_idempotent() {
        let store = store("txs");
        store.create_container("c1").unwrap();
        let payload = vec![1u8; 32];
        let info = chunk("b1_chunk_0", 0, &payload);
        store.write_chunk("c1", &info, &payload).unwrap();
        store
            .put_key(&KeyData {
                container_name: "c1".to_string(),
                name: "b1".to_string(),
                chunks: vec![info],
                metadata: BTreeMap::new(),
            })
            .unwrap();

        let tx = DeletedBlocksTransaction {
            tx_id: 1,
            container_name: "c1".to_string(),
            block_keys: vec!["b1".to_string(), "b2".to_string()],
        };
        store.apply_delete_transactions(&[tx.clone()]);
        store.apply_delete_transactions(&[tx]);
        assert_eq!(store.read_container("c1").unwrap().key_count, 0);
        let _ = fs::remove_dir_all(store.root());
    }
}
