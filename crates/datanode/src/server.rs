//! Data-plane handler mapping container protocol requests onto the store.

use std::sync::Arc;

use async_trait::async_trait;
use protocol::container::{ContainerRequest, ContainerResponse};
use protocol::server::RpcHandler;
use tracing::{debug, error};

use crate::chunk_store::ContainerStore;
use crate::error::ContainerError;

pub struct DataHandler {
    store: Arc<ContainerStore>,
}

impl DataHandler {
    pub fn new(store: Arc<ContainerStore>) -> Self {
        Self { store }
    }
}

fn error_response(e: ContainerError) -> ContainerResponse {
    match &e {
        ContainerError::Io { .. } => error!(error = %e, "data-plane IO failure"),
        _ => debug!(error = %e, "request rejected"),
    }
    ContainerResponse::Error {
        result: e.result(),
        message: e.to_string(),
    }
}

#[async_trait]
impl RpcHandler for DataHandler {
    type Request = ContainerRequest;
    type Response = ContainerResponse;

    async fn handle(&self, request: ContainerRequest) -> ContainerResponse {
        let result = match request {
            ContainerRequest::CreateContainer { container_name } => self
                .store
                .create_container(&container_name)
                .map(|_| ContainerResponse::Success),
            ContainerRequest::ReadContainer { container_name } => self
                .store
                .read_container(&container_name)
                .map(|status| ContainerResponse::Container { status }),
            ContainerRequest::DeleteContainer {
                container_name,
                force,
            } => self
                .store
                .delete_container(&container_name, force)
                .map(|_| ContainerResponse::Success),
            ContainerRequest::WriteChunk {
                container_name,
                key_name: _,
                chunk,
                data,
            } => self
                .store
                .write_chunk(&container_name, &chunk, &data)
                .map(|_| ContainerResponse::Success),
            ContainerRequest::ReadChunk {
                container_name,
                key_name: _,
                chunk,
            } => self
                .store
                .read_chunk(&container_name, &chunk)
                .map(|data| ContainerResponse::Chunk { chunk, data }),
            ContainerRequest::PutKey { key_data } => self
                .store
                .put_key(&key_data)
                .map(|_| ContainerResponse::Success),
            ContainerRequest::GetKey {
                container_name,
                key_name,
            } => self
                .store
                .get_key(&container_name, &key_name)
                .map(|key_data| ContainerResponse::Key { key_data }),
            ContainerRequest::PutSmallFile {
                key_data,
                chunk,
                data,
            } => self
                .store
                .put_small_file(&key_data, &chunk, &data)
                .map(|_| ContainerResponse::Success),
            ContainerRequest::GetSmallFile {
                container_name,
                key_name,
            } => self
                .store
                .get_small_file(&container_name, &key_name)
                .map(|(key_data, data)| ContainerResponse::SmallFile { key_data, data }),
        };
        result.unwrap_or_else(error_response)
    }
}
