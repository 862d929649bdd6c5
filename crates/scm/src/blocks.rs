//! Block allocation broker and the deleted-block transaction log.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use common::{
    AllocatedBlock, ContainerState, DatanodeId, DeletedBlocksTransaction, LocatedContainer,
    ReplicationFactor, ReplicationType,
};
use meta_store::MetaStore;
use protocol::datanode::ScmCommand;
use protocol::scm::{BlockLocation, DeleteBlockCode, DeleteBlockResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::containers::ContainerMapping;
use crate::error::ScmError;
use crate::metrics::ScmMetrics;
use crate::nodes::NodeManager;

/// Containers created on demand by block allocation use this replication.
const DEFAULT_REPLICATION: (ReplicationType, ReplicationFactor) =
    (ReplicationType::Standalone, ReplicationFactor::One);

/// Deleted-block transactions live in the block store under this prefix,
/// which sorts apart from `time_nanos:uuid` block keys.
const TX_PREFIX: &[u8] = b"#tx#";

#[derive(Debug, Serialize, Deserialize)]
struct BlockRecord {
    container_name: String,
    size: u64,
}

struct OpenContainer {
    name: String,
    remaining: u64,
}

struct PendingDeletion {
    tx: DeletedBlocksTransaction,
    targets: Vec<DatanodeId>,
    retries: u32,
}

pub struct BlockManager {
    store: MetaStore,
    mapping: Arc<ContainerMapping>,
    nodes: Arc<NodeManager>,
    container_size: u64,
    max_delete_retry: u32,
    open: Mutex<HashMap<(ReplicationType, ReplicationFactor), Vec<OpenContainer>>>,
    next_tx: AtomicU64,
    pending: Mutex<HashMap<u64, PendingDeletion>>,
    metrics: Arc<ScmMetrics>,
}

impl BlockManager {
    /// Rebuilds the open-container set and the pending deletion log from the
    /// persisted stores.
    pub fn new(
        store: MetaStore,
        mapping: Arc<ContainerMapping>,
        nodes: Arc<NodeManager>,
        container_size: u64,
        max_delete_retry: u32,
        metrics: Arc<ScmMetrics>,
    ) -> Result<Self, ScmError> {
        let mut open: HashMap<(ReplicationType, ReplicationFactor), Vec<OpenContainer>> =
            HashMap::new();
        for info in mapping.containers_in_state(ContainerState::Open)? {
            open.entry((info.pipeline.replication_type, info.pipeline.factor))
                .or_default()
                .push(OpenContainer {
                    name: info.container_name.clone(),
                    remaining: container_size.saturating_sub(info.used_bytes),
                });
        }

        let mut next_tx = 1u64;
        let mut pending = HashMap::new();
        for (_, raw) in store.iter(Some(TX_PREFIX)) {
            let tx: DeletedBlocksTransaction = serde_json::from_slice(&raw)?;
            next_tx = next_tx.max(tx.tx_id + 1);
            if let Ok(pipeline) = mapping.get(&tx.container_name) {
                let targets: Vec<DatanodeId> = pipeline.members.iter().map(|m| m.id).collect();
                for target in &targets {
                    nodes.queue_command(
                        *target,
                        ScmCommand::DeleteBlocks {
                            transactions: vec![tx.clone()],
                        },
                    );
                }
                pending.insert(
                    tx.tx_id,
                    PendingDeletion {
                        tx,
                        targets,
                        retries: 0,
                    },
                );
            }
        }

        Ok(Self {
            store,
            mapping,
            nodes,
            container_size,
            max_delete_retry,
            open: Mutex::new(open),
            next_tx: AtomicU64::new(next_tx),
            pending: Mutex::new(pending),
            metrics,
        })
    }

    /// Hand out a block: reuse any open container with room, else allocate a
    /// fresh container and tell the caller to initialize it.
    pub fn allocate_block(&self, size: u64) -> Result<AllocatedBlock, ScmError> {
        if size == 0 || size > self.container_size {
            return Err(ScmError::InvalidBlockSize(size));
        }

        let (container_name, create_container) = {
            let mut open = self.open.lock().expect("open container lock poisoned");
            let slot = open.entry(DEFAULT_REPLICATION).or_default();
            match slot.iter_mut().find(|c| c.remaining >= size) {
                Some(container) => {
                    container.remaining -= size;
                    (container.name.clone(), false)
                }
                None => {
                    let name = Uuid::new_v4().to_string();
                    self.mapping
                        .allocate(&name, DEFAULT_REPLICATION.0, DEFAULT_REPLICATION.1)?;
                    self.mapping.update_state(&name, ContainerState::Open)?;
                    slot.push(OpenContainer {
                        name: name.clone(),
                        remaining: self.container_size - size,
                    });
                    (name, true)
                }
            }
        };

        self.mapping.add_used_bytes(&container_name, size)?;
        let pipeline = self.mapping.get(&container_name)?;

        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let block_key = format!("{}:{}", nanos, Uuid::new_v4());
        let record = BlockRecord {
            container_name: container_name.clone(),
            size,
        };
        self.store
            .put(block_key.as_bytes(), &serde_json::to_vec(&record)?)?;

        self.metrics.blocks_allocated.fetch_add(1, Ordering::Relaxed);
        debug!(
            block = %block_key,
            container = %container_name,
            create_container,
            "block allocated"
        );
        Ok(AllocatedBlock {
            block_key,
            pipeline,
            create_container,
        })
    }

    /// Pipelines for the subset of `block_keys` that exist.
    pub fn get_block_locations(
        &self,
        block_keys: Vec<String>,
    ) -> Result<Vec<BlockLocation>, ScmError> {
        let mut locations = Vec::new();
        for block_key in block_keys {
            let Some(raw) = self.store.get(block_key.as_bytes())? else {
                continue;
            };
            let record: BlockRecord = serde_json::from_slice(&raw)?;
            let pipeline = self.mapping.get(&record.container_name)?;
            locations.push(BlockLocation {
                block_key,
                pipeline,
            });
        }
        Ok(locations)
    }

    /// Prefix search over block keys, resolving each hit to its container.
    pub fn locate(&self, prefixes: Vec<String>) -> Result<Vec<LocatedContainer>, ScmError> {
        let mut located = Vec::new();
        for prefix in prefixes {
            for (key, raw) in self.store.iter(Some(prefix.as_bytes())) {
                if key.starts_with(TX_PREFIX) {
                    continue;
                }
                let record: BlockRecord = serde_json::from_slice(&raw)?;
                let pipeline = self.mapping.get(&record.container_name)?;
                located.push(LocatedContainer {
                    key: String::from_utf8_lossy(&key).to_string(),
                    matched_prefix: prefix.clone(),
                    container_name: record.container_name,
                    leader: pipeline.leader,
                    locations: pipeline.members,
                });
            }
        }
        Ok(located)
    }

    /// Remove block records and queue deletion transactions to the owning
    /// datanodes. Per-key results; missing keys report `NotFound`.
    pub fn delete_blocks(
        &self,
        block_keys: Vec<String>,
    ) -> Result<Vec<DeleteBlockResult>, ScmError> {
        let mut results = Vec::new();
        let mut by_container: HashMap<String, Vec<String>> = HashMap::new();

        for block_key in block_keys {
            match self.store.get(block_key.as_bytes())? {
                Some(raw) => {
                    let record: BlockRecord = serde_json::from_slice(&raw)?;
                    self.store.delete(block_key.as_bytes())?;
                    by_container
                        .entry(record.container_name)
                        .or_default()
                        .push(block_key.clone());
                    results.push(DeleteBlockResult {
                        block_key,
                        code: DeleteBlockCode::Success,
                    });
                }
                None => results.push(DeleteBlockResult {
                    block_key,
                    code: DeleteBlockCode::NotFound,
                }),
            }
        }

        for (container_name, keys) in by_container {
            let pipeline = match self.mapping.get(&container_name) {
                Ok(pipeline) => pipeline,
                Err(ScmError::ContainerNotFound(_)) => {
                    // Container already gone; nothing left to instruct.
                    continue;
                }
                Err(e) => return Err(e),
            };
            let tx_id = self.next_tx.fetch_add(1, Ordering::SeqCst);
            let tx = DeletedBlocksTransaction {
                tx_id,
                container_name,
                block_keys: keys,
            };
            self.store
                .put(&tx_key(tx_id), &serde_json::to_vec(&tx)?)?;

            let targets: Vec<DatanodeId> = pipeline.members.iter().map(|m| m.id).collect();
            for target in &targets {
                self.nodes.queue_command(
                    *target,
                    ScmCommand::DeleteBlocks {
                        transactions: vec![tx.clone()],
                    },
                );
            }
            self.metrics
                .blocks_deleted
                .fetch_add(tx.block_keys.len() as u64, Ordering::Relaxed);
            self.pending.lock().expect("pending lock poisoned").insert(
                tx_id,
                PendingDeletion {
                    tx,
                    targets,
                    retries: 0,
                },
            );
        }

        Ok(results)
    }

    /// Periodic delivery check for deletion transactions. A transaction is
    /// committed once every target has drained its command queue; one that
    /// stays undelivered past the retry cap is dropped with a warning.
    pub fn retry_sweep(&self) {
        let mut pending = self.pending.lock().expect("pending lock poisoned");
        let mut committed = Vec::new();
        let mut dropped = Vec::new();

        for (tx_id, entry) in pending.iter_mut() {
            let undelivered = entry
                .targets
                .iter()
                .any(|t| self.nodes.pending_command_count(*t) > 0);
            if !undelivered {
                committed.push(*tx_id);
            } else {
                entry.retries += 1;
                if entry.retries > self.max_delete_retry {
                    warn!(
                        tx_id,
                        container = %entry.tx.container_name,
                        retries = entry.retries,
                        "dropping undeliverable deletion transaction"
                    );
                    dropped.push(*tx_id);
                }
            }
        }

        for tx_id in committed {
            pending.remove(&tx_id);
            if let Err(e) = self.store.delete(&tx_key(tx_id)) {
                warn!(tx_id, error = %e, "failed to clear committed deletion tx");
            }
            self.metrics
                .deletion_txs_committed
                .fetch_add(1, Ordering::Relaxed);
        }
        for tx_id in dropped {
            pending.remove(&tx_id);
            if let Err(e) = self.store.delete(&tx_key(tx_id)) {
                warn!(tx_id, error = %e, "failed to clear dropped deletion tx");
            }
            self.metrics
                .deletion_txs_dropped
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn pending_deletions(&self) -> usize {
        self.pending.lock().expect("pending lock poisoned").len()
    }
}

fn tx_key(tx_id: u64) -> Vec<u8> {
    let mut key = TX_PREFIX.to_vec();
    key.extend_from_slice(format!("{:020}", tx_id).as_bytes());
    key
}
