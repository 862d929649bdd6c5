//! Key-Space Manager: the Volume/Bucket/Key namespace over one metadata
//! store, with block placement delegated to SCM.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::config::OzoneConfig;
use common::AllocatedBlock;
use meta_store::MetaStore;
use protocol::client::ScmClient;
use protocol::scm::ScmCallError;
use tokio::net::TcpListener;
use tracing::info;

pub mod bucket;
pub mod error;
pub mod key;
pub mod metrics;
pub mod server;
pub mod volume;

pub use bucket::BucketManager;
pub use error::KsmError;
pub use key::KeyManager;
pub use metrics::KsmMetrics;
pub use volume::VolumeManager;

use server::KsmHandler;

/// Seam to the SCM block broker. KSM never retries through it; failures map
/// to `INTERNAL_ERROR` and surface to the caller.
#[async_trait]
pub trait BlockAllocator: Send + Sync {
    async fn allocate_block(&self, size: u64) -> anyhow::Result<AllocatedBlock>;
    async fn delete_blocks(&self, block_keys: Vec<String>) -> anyhow::Result<()>;
}

/// Production allocator: the SCM client protocol over TCP, connected lazily
/// and reconnected after transport failures.
pub struct ScmBlockAllocator {
    addr: String,
    timeout: Duration,
    client: tokio::sync::Mutex<Option<ScmClient>>,
}

impl ScmBlockAllocator {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
            client: tokio::sync::Mutex::new(None),
        }
    }
}

#[async_trait]
impl BlockAllocator for ScmBlockAllocator {
    async fn allocate_block(&self, size: u64) -> anyhow::Result<AllocatedBlock> {
        let mut guard = self.client.lock().await;
        if guard.is_none() {
            *guard = Some(ScmClient::connect(&self.addr, self.timeout).await?);
        }
        let client = guard.as_mut().expect("client just connected");
        match client.allocate_block(size).await {
            Ok(block) => Ok(block),
            Err(e) => {
                if matches!(e, ScmCallError::Transport(_)) {
                    *guard = None;
                }
                Err(e.into())
            }
        }
    }

    async fn delete_blocks(&self, block_keys: Vec<String>) -> anyhow::Result<()> {
        let mut guard = self.client.lock().await;
        if guard.is_none() {
            *guard = Some(ScmClient::connect(&self.addr, self.timeout).await?);
        }
        let client = guard.as_mut().expect("client just connected");
        match client.delete_blocks(block_keys).await {
            Ok(_) => Ok(()),
            Err(e) => {
                if matches!(e, ScmCallError::Transport(_)) {
                    *guard = None;
                }
                Err(e.into())
            }
        }
    }
}

pub struct KeySpaceManager {
    config: OzoneConfig,
    volumes: VolumeManager,
    buckets: BucketManager,
    keys: KeyManager,
    metrics: Arc<KsmMetrics>,
}

impl KeySpaceManager {
    pub fn new(
        config: OzoneConfig,
        store: MetaStore,
        allocator: Arc<dyn BlockAllocator>,
        metrics: Arc<KsmMetrics>,
    ) -> Arc<Self> {
        let volumes = VolumeManager::new(
            store.clone(),
            config.max_user_volumes,
            Arc::clone(&metrics),
        );
        let buckets = BucketManager::new(store.clone(), Arc::clone(&metrics));
        let keys = KeyManager::new(store, allocator, Arc::clone(&metrics));
        Arc::new(Self {
            config,
            volumes,
            buckets,
            keys,
            metrics,
        })
    }

    /// Open the KSM over its store under `dir`.
    pub fn open<P: AsRef<Path>>(
        config: OzoneConfig,
        dir: P,
        allocator: Arc<dyn BlockAllocator>,
        metrics: Arc<KsmMetrics>,
    ) -> Result<Arc<Self>, KsmError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|source| KsmError::Bind {
            addr: dir.display().to_string(),
            source,
        })?;
        let store = MetaStore::open(dir.join("ksm.db"))?;
        Ok(Self::new(config, store, allocator, metrics))
    }

    /// Bind the KSM RPC surface; returns the bound address.
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr, KsmError> {
        let listener = TcpListener::bind(&self.config.ksm_address)
            .await
            .map_err(|source| KsmError::Bind {
                addr: self.config.ksm_address.clone(),
                source,
            })?;
        let addr = listener.local_addr().map_err(|source| KsmError::Bind {
            addr: self.config.ksm_address.clone(),
            source,
        })?;
        tokio::spawn(protocol::server::serve(
            listener,
            Arc::new(KsmHandler::new(Arc::clone(self))),
            self.config.ksm_handler_count,
        ));
        info!(address = %addr, "KSM started");
        Ok(addr)
    }

    pub fn volumes(&self) -> &VolumeManager {
        &self.volumes
    }

    pub fn buckets(&self) -> &BucketManager {
        &self.buckets
    }

    pub fn keys(&self) -> &KeyManager {
        &self.keys
    }

    pub fn metrics(&self) -> &Arc<KsmMetrics> {
        &self.metrics
    }
}
