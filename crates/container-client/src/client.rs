//! Single-pipeline data-plane client.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::Pipeline;
use protocol::client::RpcConnection;
use protocol::container::{ContainerRequest, ContainerResponse};
use tokio::sync::oneshot;
use tracing::debug;

use crate::ClientError;

/// Pending-operation gauges per command type plus totals. Handed to every
/// client by the manager; no global registry.
#[derive(Debug, Default)]
pub struct XceiverClientMetrics {
    pub pending_create_container: AtomicU64,
    pub pending_write_chunk: AtomicU64,
    pub pending_read_chunk: AtomicU64,
    pub pending_put_key: AtomicU64,
    pub pending_get_key: AtomicU64,
    pub pending_put_small_file: AtomicU64,
    pub pending_get_small_file: AtomicU64,
    pub pending_other: AtomicU64,
    pub total_sent: AtomicU64,
    pub total_failed: AtomicU64,
}

impl XceiverClientMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn pending_for(&self, request: &ContainerRequest) -> &AtomicU64 {
        match request {
            ContainerRequest::CreateContainer { .. } => &self.pending_create_container,
            ContainerRequest::WriteChunk { .. } => &self.pending_write_chunk,
            ContainerRequest::ReadChunk { .. } => &self.pending_read_chunk,
            ContainerRequest::PutKey { .. } => &self.pending_put_key,
            ContainerRequest::GetKey { .. } => &self.pending_get_key,
            ContainerRequest::PutSmallFile { .. } => &self.pending_put_small_file,
            ContainerRequest::GetSmallFile { .. } => &self.pending_get_small_file,
            _ => &self.pending_other,
        }
    }
}

/// One logical connection to a pipeline's leader. The client never fails
/// over to a non-leader replica; any RPC failure surfaces to the caller.
pub struct XceiverClient {
    pipeline: Pipeline,
    conn: tokio::sync::Mutex<RpcConnection>,
    metrics: Arc<XceiverClientMetrics>,
}

impl std::fmt::Debug for XceiverClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XceiverClient")
            .field("pipeline", &self.pipeline)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl XceiverClient {
    pub async fn connect(
        pipeline: Pipeline,
        timeout: Duration,
        metrics: Arc<XceiverClientMetrics>,
    ) -> Result<Self, ClientError> {
        let addr = pipeline
            .leader_addr()
            .ok_or_else(|| ClientError::NoLeader(pipeline.container_name.clone()))?;
        debug!(container = %pipeline.container_name, leader = %addr, "connecting to pipeline leader");
        let conn = RpcConnection::connect(&addr, timeout).await?;
        Ok(Self {
            pipeline,
            conn: tokio::sync::Mutex::new(conn),
            metrics,
        })
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn metrics(&self) -> &Arc<XceiverClientMetrics> {
        &self.metrics
    }

    /// Send one command and wait for its response. The pending gauge for the
    /// command type is decremented on completion and on failure alike.
    pub async fn send_command(
        &self,
        request: ContainerRequest,
    ) -> Result<ContainerResponse, ClientError> {
        let gauge = self.metrics.pending_for(&request);
        gauge.fetch_add(1, Ordering::Relaxed);
        self.metrics.total_sent.fetch_add(1, Ordering::Relaxed);

        let result = {
            let mut conn = self.conn.lock().await;
            conn.call::<_, ContainerResponse>(&request).await
        };
        gauge.fetch_sub(1, Ordering::Relaxed);

        match result {
            Ok(ContainerResponse::Error { result, message }) => {
                self.metrics.total_failed.fetch_add(1, Ordering::Relaxed);
                Err(ClientError::Remote { result, message })
            }
            Ok(response) => Ok(response),
            Err(e) => {
                self.metrics.total_failed.fetch_add(1, Ordering::Relaxed);
                Err(ClientError::Transport(e))
            }
        }
    }

    /// Fire-and-await-later variant; the receiver resolves with the command's
    /// outcome.
    pub fn send_command_async(
        self: &Arc<Self>,
        request: ContainerRequest,
    ) -> oneshot::Receiver<Result<ContainerResponse, ClientError>> {
        let (tx, rx) = oneshot::channel();
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let _ = tx.send(client.send_command(request).await);
        });
        rx
    }
}
