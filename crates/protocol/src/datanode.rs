//! StorageContainerDatanodeProtocol: datanode↔SCM messages.

use common::{DatanodeDetails, DatanodeId, DeletedBlocksTransaction, NodeStat};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerReportEntry {
    pub container_name: String,
    pub used_bytes: u64,
    pub key_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DatanodeRequest {
    GetVersion,
    Register {
        details: DatanodeDetails,
        stat: NodeStat,
        containers: Vec<ContainerReportEntry>,
    },
    Heartbeat {
        datanode_id: DatanodeId,
        stat: NodeStat,
    },
}

/// Commands SCM hands back on heartbeats, discriminated by `type` on the
/// wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScmCommand {
    DeleteBlocks {
        transactions: Vec<DeletedBlocksTransaction>,
    },
    Reregister,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointErrorCode {
    InvalidRegistration,
    InternalError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DatanodeResponse {
    Version {
        version: u32,
        cluster_id: String,
    },
    Registered {
        datanode_id: DatanodeId,
        cluster_id: String,
        host_name: String,
        ip_address: String,
    },
    Heartbeat {
        commands: Vec<ScmCommand>,
    },
    Error {
        code: EndpointErrorCode,
        message: String,
    },
}
