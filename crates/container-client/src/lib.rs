//! Client side of the container data plane: pooled leader connections and
//! chunk-granular key streams.

use protocol::container::{ContainerRequest, ContainerResponse, ContainerResult};
use thiserror::Error;

pub mod client;
pub mod manager;
pub mod streams;

pub use client::{XceiverClient, XceiverClientMetrics};
pub use manager::XceiverClientManager;
pub use streams::{get_small_file, put_small_file, ChunkInputStream, ChunkOutputStream};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport failure: {0}")]
    Transport(#[from] protocol::ProtocolError),

    #[error("datanode returned {result:?}: {message}")]
    Remote {
        result: ContainerResult,
        message: String,
    },

    #[error("pipeline for {0} has no reachable leader")]
    NoLeader(String),

    #[error("chunk {chunk} failed checksum verification")]
    ChecksumMismatch { chunk: String },

    #[error("stream is closed")]
    StreamClosed,

    #[error("unexpected datanode response: {0}")]
    Unexpected(String),
}

/// Initialize a container on its pipeline leader. An already-initialized
/// container is fine: the grant that asked for creation may be replayed.
pub async fn ensure_container(
    client: &XceiverClient,
    container_name: &str,
) -> Result<(), ClientError> {
    match client
        .send_command(ContainerRequest::CreateContainer {
            container_name: container_name.to_string(),
        })
        .await
    {
        Ok(ContainerResponse::Success) => Ok(()),
        Ok(other) => Err(ClientError::Unexpected(format!("{:?}", other))),
        Err(ClientError::Remote {
            result: ContainerResult::ContainerExists,
            ..
        }) => Ok(()),
        Err(e) => Err(e),
    }
}
