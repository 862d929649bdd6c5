//! RPC connections and the typed control-plane clients.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::TcpStream;

use common::{
    AllocatedBlock, DatanodeDetails, DatanodeId, LocatedContainer, NodeState, NodeStat, Pipeline,
    ReplicationFactor, ReplicationType,
};

use crate::codec::{read_frame, write_frame, ProtocolError};
use crate::datanode::{ContainerReportEntry, DatanodeRequest, DatanodeResponse};
use crate::ksm::{KsmCallError, KsmRequest, KsmResponse};
use crate::scm::{
    BlockLocation, DeleteBlockResult, NodeReportEntry, ScmCallError, ScmRequest, ScmResponse,
};

/// One TCP connection exchanging sequential request/response frames under a
/// per-call deadline.
pub struct RpcConnection {
    stream: TcpStream,
    timeout: Duration,
}

impl std::fmt::Debug for RpcConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcConnection")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RpcConnection {
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self, ProtocolError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ProtocolError::Timeout(timeout))??;
        Ok(Self { stream, timeout })
    }

    pub async fn call<Req, Resp>(&mut self, request: &Req) -> Result<Resp, ProtocolError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let deadline = self.timeout;
        let stream = &mut self.stream;
        tokio::time::timeout(deadline, async move {
            write_frame(&mut *stream, request).await?;
            match read_frame(&mut *stream).await? {
                Some(response) => Ok(response),
                None => Err(ProtocolError::ConnectionClosed),
            }
        })
        .await
        .map_err(|_| ProtocolError::Timeout(deadline))?
    }
}

/// Typed client for the StorageContainerLocationProtocol.
pub struct ScmClient {
    conn: RpcConnection,
}

impl ScmClient {
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self, ScmCallError> {
        Ok(Self {
            conn: RpcConnection::connect(addr, timeout).await?,
        })
    }

    async fn call(&mut self, request: &ScmRequest) -> Result<ScmResponse, ScmCallError> {
        match self.conn.call::<_, ScmResponse>(request).await? {
            ScmResponse::Error { code, message } => Err(ScmCallError::Remote { code, message }),
            response => Ok(response),
        }
    }

    pub async fn allocate_container(
        &mut self,
        container_name: &str,
        replication_type: ReplicationType,
        factor: ReplicationFactor,
    ) -> Result<Pipeline, ScmCallError> {
        match self
            .call(&ScmRequest::AllocateContainer {
                container_name: container_name.to_string(),
                replication_type,
                factor,
            })
            .await?
        {
            ScmResponse::Container { pipeline } => Ok(pipeline),
            other => Err(ScmCallError::Unexpected(format!("{:?}", other))),
        }
    }

    pub async fn get_container(&mut self, container_name: &str) -> Result<Pipeline, ScmCallError> {
        match self
            .call(&ScmRequest::GetContainer {
                container_name: container_name.to_string(),
            })
            .await?
        {
            ScmResponse::Container { pipeline } => Ok(pipeline),
            other => Err(ScmCallError::Unexpected(format!("{:?}", other))),
        }
    }

    pub async fn delete_container(&mut self, container_name: &str) -> Result<(), ScmCallError> {
        match self
            .call(&ScmRequest::DeleteContainer {
                container_name: container_name.to_string(),
            })
            .await?
        {
            ScmResponse::Deleted => Ok(()),
            other => Err(ScmCallError::Unexpected(format!("{:?}", other))),
        }
    }

    pub async fn get_storage_container_locations(
        &mut self,
        prefixes: Vec<String>,
    ) -> Result<Vec<LocatedContainer>, ScmCallError> {
        match self
            .call(&ScmRequest::GetStorageContainerLocations { prefixes })
            .await?
        {
            ScmResponse::Located { containers } => Ok(containers),
            other => Err(ScmCallError::Unexpected(format!("{:?}", other))),
        }
    }

    pub async fn allocate_block(&mut self, size: u64) -> Result<AllocatedBlock, ScmCallError> {
        match self.call(&ScmRequest::AllocateBlock { size }).await? {
            ScmResponse::Block { block } => Ok(block),
            other => Err(ScmCallError::Unexpected(format!("{:?}", other))),
        }
    }

    pub async fn delete_blocks(
        &mut self,
        block_keys: Vec<String>,
    ) -> Result<Vec<DeleteBlockResult>, ScmCallError> {
        match self.call(&ScmRequest::DeleteBlocks { block_keys }).await? {
            ScmResponse::BlocksDeleted { results } => Ok(results),
            other => Err(ScmCallError::Unexpected(format!("{:?}", other))),
        }
    }

    pub async fn get_block_locations(
        &mut self,
        block_keys: Vec<String>,
    ) -> Result<Vec<BlockLocation>, ScmCallError> {
        match self
            .call(&ScmRequest::GetBlockLocations { block_keys })
            .await?
        {
            ScmResponse::BlockLocations { locations } => Ok(locations),
            other => Err(ScmCallError::Unexpected(format!("{:?}", other))),
        }
    }

    pub async fn get_node_report(
        &mut self,
        state: Option<NodeState>,
    ) -> Result<Vec<NodeReportEntry>, ScmCallError> {
        match self.call(&ScmRequest::GetNodeReport { state }).await? {
            ScmResponse::NodeReport { nodes } => Ok(nodes),
            other => Err(ScmCallError::Unexpected(format!("{:?}", other))),
        }
    }
}

/// Typed client for the KeySpaceManagerProtocol.
pub struct KsmClient {
    conn: RpcConnection,
}

impl KsmClient {
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self, KsmCallError> {
        Ok(Self {
            conn: RpcConnection::connect(addr, timeout).await?,
        })
    }

    pub async fn call(&mut self, request: &KsmRequest) -> Result<KsmResponse, KsmCallError> {
        match self.conn.call::<_, KsmResponse>(request).await? {
            KsmResponse::Error { status, message } => {
                Err(KsmCallError::Remote { status, message })
            }
            response => Ok(response),
        }
    }
}

/// Client used by the datanode endpoint state machine.
pub struct EndpointClient {
    conn: RpcConnection,
}

impl EndpointClient {
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self, ProtocolError> {
        Ok(Self {
            conn: RpcConnection::connect(addr, timeout).await?,
        })
    }

    pub async fn get_version(&mut self) -> Result<DatanodeResponse, ProtocolError> {
        self.conn.call(&DatanodeRequest::GetVersion).await
    }

    pub async fn register(
        &mut self,
        details: DatanodeDetails,
        stat: NodeStat,
        containers: Vec<ContainerReportEntry>,
    ) -> Result<DatanodeResponse, ProtocolError> {
        self.conn
            .call(&DatanodeRequest::Register {
                details,
                stat,
                containers,
            })
            .await
    }

    pub async fn heartbeat(
        &mut self,
        datanode_id: DatanodeId,
        stat: NodeStat,
    ) -> Result<DatanodeResponse, ProtocolError> {
        self.conn
            .call(&DatanodeRequest::Heartbeat { datanode_id, stat })
            .await
    }
}
