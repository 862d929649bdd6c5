//! RPC handlers binding the two SCM protocol surfaces to the managers.

use std::sync::Arc;

use async_trait::async_trait;
use protocol::datanode::{DatanodeRequest, DatanodeResponse, EndpointErrorCode};
use protocol::scm::{NodeReportEntry, ScmRequest, ScmResponse};
use protocol::server::RpcHandler;
use protocol::PROTOCOL_VERSION;
use tracing::{debug, error, warn};

use crate::error::ScmError;
use crate::StorageContainerManager;

fn error_response(e: ScmError) -> ScmResponse {
    match &e {
        // Capacity problems are operator-actionable.
        ScmError::InsufficientNodes { .. } => warn!(error = %e, "allocation failed"),
        ScmError::Store(_) | ScmError::Record(_) | ScmError::Bind { .. } => {
            error!(error = %e, "internal SCM failure")
        }
        _ => debug!(error = %e, "request rejected"),
    }
    ScmResponse::Error {
        code: e.result_code(),
        message: e.to_string(),
    }
}

/// StorageContainerLocationProtocol surface.
pub struct ScmClientHandler {
    scm: Arc<StorageContainerManager>,
}

impl ScmClientHandler {
    pub fn new(scm: Arc<StorageContainerManager>) -> Self {
        Self { scm }
    }
}

#[async_trait]
impl RpcHandler for ScmClientHandler {
    type Request = ScmRequest;
    type Response = ScmResponse;

    async fn handle(&self, request: ScmRequest) -> ScmResponse {
        let result = match request {
            ScmRequest::AllocateContainer {
                container_name,
                replication_type,
                factor,
            } => self
                .scm
                .mapping()
                .allocate(&container_name, replication_type, factor)
                .map(|pipeline| ScmResponse::Container { pipeline }),
            ScmRequest::GetContainer { container_name } => self
                .scm
                .mapping()
                .get(&container_name)
                .map(|pipeline| ScmResponse::Container { pipeline }),
            ScmRequest::DeleteContainer { container_name } => self
                .scm
                .mapping()
                .delete(&container_name)
                .map(|_| ScmResponse::Deleted),
            ScmRequest::GetStorageContainerLocations { prefixes } => self
                .scm
                .blocks()
                .locate(prefixes)
                .map(|containers| ScmResponse::Located { containers }),
            ScmRequest::AllocateBlock { size } => self
                .scm
                .blocks()
                .allocate_block(size)
                .map(|block| ScmResponse::Block { block }),
            ScmRequest::DeleteBlocks { block_keys } => self
                .scm
                .blocks()
                .delete_blocks(block_keys)
                .map(|results| ScmResponse::BlocksDeleted { results }),
            ScmRequest::GetBlockLocations { block_keys } => self
                .scm
                .blocks()
                .get_block_locations(block_keys)
                .map(|locations| ScmResponse::BlockLocations { locations }),
            ScmRequest::GetNodeReport { state } => {
                let nodes = self
                    .scm
                    .nodes()
                    .node_report(state)
                    .into_iter()
                    .map(|(details, state, stat)| NodeReportEntry {
                        details,
                        state,
                        stat,
                    })
                    .collect();
                Ok(ScmResponse::NodeReport { nodes })
            }
        };
        result.unwrap_or_else(error_response)
    }
}

/// StorageContainerDatanodeProtocol surface.
pub struct ScmDatanodeHandler {
    scm: Arc<StorageContainerManager>,
}

impl ScmDatanodeHandler {
    pub fn new(scm: Arc<StorageContainerManager>) -> Self {
        Self { scm }
    }
}

#[async_trait]
impl RpcHandler for ScmDatanodeHandler {
    type Request = DatanodeRequest;
    type Response = DatanodeResponse;

    async fn handle(&self, request: DatanodeRequest) -> DatanodeResponse {
        match request {
            DatanodeRequest::GetVersion => DatanodeResponse::Version {
                version: PROTOCOL_VERSION,
                cluster_id: self.scm.nodes().cluster_id().to_string(),
            },
            DatanodeRequest::Register {
                details,
                stat,
                containers,
            } => {
                debug!(
                    datanode = %details.id,
                    containers = containers.len(),
                    "processing registration"
                );
                match self.scm.nodes().register(details.clone(), stat) {
                    Ok(()) => DatanodeResponse::Registered {
                        datanode_id: details.id,
                        cluster_id: self.scm.nodes().cluster_id().to_string(),
                        host_name: details.host_name,
                        ip_address: details.ip_address,
                    },
                    Err(e) => DatanodeResponse::Error {
                        code: EndpointErrorCode::InvalidRegistration,
                        message: e.to_string(),
                    },
                }
            }
            DatanodeRequest::Heartbeat { datanode_id, stat } => DatanodeResponse::Heartbeat {
                commands: self.scm.nodes().heartbeat(datanode_id, stat),
            },
        }
    }
}
