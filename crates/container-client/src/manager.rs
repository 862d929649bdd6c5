//! Reference-counted pool of data-plane clients, one per pipeline leader.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::config::OzoneConfig;
use common::Pipeline;
use tracing::debug;

use crate::client::{XceiverClient, XceiverClientMetrics};
use crate::ClientError;

struct PoolEntry {
    client: Arc<XceiverClient>,
    refs: usize,
    idle_since: Option<Instant>,
}

/// At most one logical client per pipeline leader. `acquire`/`release`
/// reference-count; an unreferenced client is closed once it has been idle
/// past the grace window.
pub struct XceiverClientManager {
    clients: tokio::sync::Mutex<HashMap<String, PoolEntry>>,
    timeout: Duration,
    idle_grace: Duration,
    metrics: Arc<XceiverClientMetrics>,
}

impl XceiverClientManager {
    pub fn new(config: &OzoneConfig) -> Self {
        Self {
            clients: tokio::sync::Mutex::new(HashMap::new()),
            timeout: config.rpc_timeout(),
            idle_grace: config.client_idle(),
            metrics: Arc::new(XceiverClientMetrics::new()),
        }
    }

    pub fn metrics(&self) -> &Arc<XceiverClientMetrics> {
        &self.metrics
    }

    /// Borrow the pooled client for this pipeline's leader, connecting if
    /// none exists. The TCP connect happens outside the pool lock.
    pub async fn acquire(&self, pipeline: &Pipeline) -> Result<Arc<XceiverClient>, ClientError> {
        let key = pipeline
            .leader_addr()
            .ok_or_else(|| ClientError::NoLeader(pipeline.container_name.clone()))?;

        {
            let mut clients = self.clients.lock().await;
            evict_idle(&mut clients, self.idle_grace);
            if let Some(entry) = clients.get_mut(&key) {
                entry.refs += 1;
                entry.idle_since = None;
                return Ok(Arc::clone(&entry.client));
            }
        }

        let client = Arc::new(
            XceiverClient::connect(pipeline.clone(), self.timeout, Arc::clone(&self.metrics))
                .await?,
        );

        let mut clients = self.clients.lock().await;
        if let Some(entry) = clients.get_mut(&key) {
            // Another caller connected while we were; keep theirs.
            entry.refs += 1;
            entry.idle_since = None;
            return Ok(Arc::clone(&entry.client));
        }
        clients.insert(
            key,
            PoolEntry {
                client: Arc::clone(&client),
                refs: 1,
                idle_since: None,
            },
        );
        Ok(client)
    }

    /// Return a borrowed client. The last release starts the idle clock.
    pub async fn release(&self, client: &Arc<XceiverClient>) {
        let Some(key) = client.pipeline().leader_addr() else {
            return;
        };
        let mut clients = self.clients.lock().await;
        if let Some(entry) = clients.get_mut(&key) {
            entry.refs = entry.refs.saturating_sub(1);
            if entry.refs == 0 {
                entry.idle_since = Some(Instant::now());
            }
        }
    }

    pub async fn pooled_count(&self) -> usize {
        self.clients.lock().await.len()
    }
}

fn evict_idle(clients: &mut HashMap<String, PoolEntry>, grace: Duration) {
    clients.retain(|key, entry| {
        let keep = entry.refs > 0
            || entry
                .idle_since
                .map(|since| since.elapsed() < grace)
                .unwrap_or(true);
        if !keep {
            debug!(leader = %key, "closing idle data-plane client");
        }
        keep
    });
}
