use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod config;
pub mod keys;

/// Quota value meaning "no quota set".
pub const MAX_QUOTA_BYTES: u64 = u64::MAX;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct DatanodeId(pub Uuid);

impl DatanodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for DatanodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DatanodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Liveness states tracked by the SCM node manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    Healthy,
    Stale,
    Dead,
    Decommissioning,
    Decommissioned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplicationType {
    Standalone,
    Ratis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplicationFactor {
    One,
    Three,
}

impl ReplicationFactor {
    /// Number of datanodes a pipeline of this factor must carry.
    pub fn count(&self) -> usize {
        match self {
            ReplicationFactor::One => 1,
            ReplicationFactor::Three => 3,
        }
    }
}

/// Capacity statistics reported by a datanode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeStat {
    pub capacity: u64,
    pub used: u64,
    pub remaining: u64,
}

impl NodeStat {
    pub fn new(capacity: u64, used: u64, remaining: u64) -> Self {
        Self {
            capacity,
            used,
            remaining,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatanodeDetails {
    pub id: DatanodeId,
    pub host_name: String,
    pub ip_address: String,
    /// Port serving the container data-plane protocol.
    pub container_port: u16,
}

impl DatanodeDetails {
    pub fn container_addr(&self) -> String {
        format!("{}:{}", self.ip_address, self.container_port)
    }
}

/// Ordered replica set for one container. The first member is the leader and
/// the ordering carries write-sequencing semantics for Ratis pipelines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    pub container_name: String,
    pub leader: DatanodeId,
    pub members: Vec<DatanodeDetails>,
    pub replication_type: ReplicationType,
    pub factor: ReplicationFactor,
}

impl Pipeline {
    pub fn new(
        container_name: impl Into<String>,
        members: Vec<DatanodeDetails>,
        replication_type: ReplicationType,
        factor: ReplicationFactor,
    ) -> Self {
        let leader = members
            .first()
            .map(|m| m.id)
            .unwrap_or_else(DatanodeId::new);
        Self {
            container_name: container_name.into(),
            leader,
            members,
            replication_type,
            factor,
        }
    }

    pub fn leader_details(&self) -> Option<&DatanodeDetails> {
        self.members.iter().find(|m| m.id == self.leader)
    }

    pub fn leader_addr(&self) -> Option<String> {
        self.leader_details().map(|m| m.container_addr())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerState {
    Allocated,
    Creating,
    Open,
    Closing,
    Closed,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub container_name: String,
    pub state: ContainerState,
    pub pipeline: Pipeline,
    pub used_bytes: u64,
}

/// Block grant handed out by the SCM block manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatedBlock {
    pub block_key: String,
    pub pipeline: Pipeline,
    /// True when the caller must instruct the datanode to initialize the
    /// container before writing to it.
    pub create_container: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkInfo {
    pub chunk_name: String,
    /// Byte offset of this chunk within the key's data.
    pub offset: u64,
    pub len: u64,
    pub checksum: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyData {
    pub container_name: String,
    pub name: String,
    pub chunks: Vec<ChunkInfo>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl KeyData {
    pub fn total_len(&self) -> u64 {
        self.chunks.iter().map(|c| c.len).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatedContainer {
    pub key: String,
    pub matched_prefix: String,
    pub container_name: String,
    pub leader: DatanodeId,
    pub locations: Vec<DatanodeDetails>,
}

/// One batch of block deletions destined for the datanodes of a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedBlocksTransaction {
    pub tx_id: u64,
    pub container_name: String,
    pub block_keys: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AclType {
    User,
    Group,
    World,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AclRights {
    Read,
    Write,
    ReadWrite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OzoneAcl {
    pub acl_type: AclType,
    pub name: String,
    pub rights: AclRights,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageType {
    Disk,
    Ssd,
    Archive,
    RamDisk,
}

impl Default for StorageType {
    fn default() -> Self {
        StorageType::Disk
    }
}

/// Persisted volume record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub volume: String,
    pub owner: String,
    pub admin: String,
    pub quota_bytes: u64,
    pub created_on: u64,
    #[serde(default)]
    pub acls: Vec<OzoneAcl>,
}

/// Arguments for volume creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeArgs {
    pub volume: String,
    pub owner: String,
    pub admin: String,
    pub quota_bytes: Option<u64>,
    #[serde(default)]
    pub acls: Vec<OzoneAcl>,
}

/// Persisted bucket record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketInfo {
    pub volume: String,
    pub bucket: String,
    #[serde(default)]
    pub acls: Vec<OzoneAcl>,
    pub versioning: bool,
    pub storage_type: StorageType,
    pub created_on: u64,
}

/// Mutation arguments for `set_bucket_property`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketArgs {
    pub volume: String,
    pub bucket: String,
    #[serde(default)]
    pub add_acls: Vec<OzoneAcl>,
    #[serde(default)]
    pub remove_acls: Vec<OzoneAcl>,
    pub versioning: Option<bool>,
    pub storage_type: Option<StorageType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyArgs {
    pub volume: String,
    pub bucket: String,
    pub key: String,
    pub data_size: u64,
}

/// Persisted key record pointing at the block SCM granted for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    pub volume: String,
    pub bucket: String,
    pub key: String,
    pub data_size: u64,
    pub block_key: String,
    pub container_name: String,
    pub should_create_container: bool,
    pub created_on: u64,
}

/// Seconds since the Unix epoch; used for `created_on` stamps only, never
/// for liveness decisions.
pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replication_factor_counts() {
        assert_eq!(ReplicationFactor::One.count(), 1);
        assert_eq!(ReplicationFactor::Three.count(), 3);
    }

    #[test]
    fn pipeline_leader_is_first_member() {
        let members: Vec<DatanodeDetails> = (0..3)
            .map(|i| DatanodeDetails {
                id: DatanodeId::new(),
                host_name: format!("host{}", i),
                ip_address: "127.0.0.1".to_string(),
                container_port: 9000 + i as u16,
            })
            .collect();
        let first = members[0].id;
        let pipeline = Pipeline::new(
            "c1",
            members,
            ReplicationType::Standalone,
            ReplicationFactor::Three,
        );
        assert_eq!(pipeline.leader, first);
        assert_eq!(pipeline.leader_addr().as_deref(), Some("127.0.0.1:9000"));
    }

    #[test]
    fn key_data_total_len_sums_chunks() {
        let chunk = |name: &str, offset: u64, len: u64| ChunkInfo {
            chunk_name: name.to_string(),
            offset,
            len,
            checksum: String::new(),
            metadata: BTreeMap::new(),
        };
        let data = KeyData {
            container_name: "c1".to_string(),
            name: "k1".to_string(),
            chunks: vec![chunk("a", 0, 100), chunk("b", 100, 28)],
            metadata: BTreeMap::new(),
        };
        assert_eq!(data.total_len(), 128);
    }
}
