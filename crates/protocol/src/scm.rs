//! StorageContainerLocationProtocol: client↔SCM messages.

use common::{
    AllocatedBlock, DatanodeDetails, LocatedContainer, NodeState, NodeStat, Pipeline,
    ReplicationFactor, ReplicationType,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::ProtocolError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScmRequest {
    AllocateContainer {
        container_name: String,
        replication_type: ReplicationType,
        factor: ReplicationFactor,
    },
    GetContainer {
        container_name: String,
    },
    DeleteContainer {
        container_name: String,
    },
    GetStorageContainerLocations {
        prefixes: Vec<String>,
    },
    AllocateBlock {
        size: u64,
    },
    DeleteBlocks {
        block_keys: Vec<String>,
    },
    GetBlockLocations {
        block_keys: Vec<String>,
    },
    GetNodeReport {
        state: Option<NodeState>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScmResultCode {
    Success,
    UnknownFailure,
    ContainerNotFound,
    ContainerExists,
    InsufficientNodes,
    InvalidBlockSize,
    InvalidRequest,
}

/// Per-key outcome of a `DeleteBlocks` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteBlockCode {
    Success,
    NotFound,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteBlockResult {
    pub block_key: String,
    pub code: DeleteBlockCode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockLocation {
    pub block_key: String,
    pub pipeline: Pipeline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeReportEntry {
    pub details: DatanodeDetails,
    pub state: NodeState,
    pub stat: NodeStat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScmResponse {
    Error {
        code: ScmResultCode,
        message: String,
    },
    Container {
        pipeline: Pipeline,
    },
    Deleted,
    Located {
        containers: Vec<LocatedContainer>,
    },
    Block {
        block: AllocatedBlock,
    },
    BlocksDeleted {
        results: Vec<DeleteBlockResult>,
    },
    BlockLocations {
        locations: Vec<BlockLocation>,
    },
    NodeReport {
        nodes: Vec<NodeReportEntry>,
    },
}

/// Failure surfaced by the typed SCM client.
#[derive(Debug, Error)]
pub enum ScmCallError {
    #[error("transport failure: {0}")]
    Transport(#[from] ProtocolError),

    #[error("SCM returned {code:?}: {message}")]
    Remote {
        code: ScmResultCode,
        message: String,
    },

    #[error("unexpected SCM response: {0}")]
    Unexpected(String),
}
