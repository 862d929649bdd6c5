//! Storage Container Manager: the cluster-wide authority for datanode
//! membership, container placement, and block allocation.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use common::config::OzoneConfig;
use meta_store::MetaStore;
use tokio::net::TcpListener;
use tracing::info;
use uuid::Uuid;

pub mod blocks;
pub mod containers;
pub mod error;
pub mod metrics;
pub mod nodes;
pub mod placement;
pub mod server;

pub use error::ScmError;

use blocks::BlockManager;
use containers::ContainerMapping;
use metrics::ScmMetrics;
use nodes::NodeManager;
use placement::PlacementPolicy;
use server::{ScmClientHandler, ScmDatanodeHandler};

pub struct StorageContainerManager {
    config: OzoneConfig,
    nodes: Arc<NodeManager>,
    mapping: Arc<ContainerMapping>,
    blocks: Arc<BlockManager>,
    metrics: Arc<ScmMetrics>,
}

impl StorageContainerManager {
    pub fn new(
        config: OzoneConfig,
        container_store: MetaStore,
        block_store: MetaStore,
        metrics: Arc<ScmMetrics>,
    ) -> Result<Arc<Self>, ScmError> {
        let placement = PlacementPolicy::from_name(&config.container_placement)?;
        let cluster_id = format!("cluster-{}", Uuid::new_v4());
        let nodes = Arc::new(NodeManager::new(
            cluster_id,
            config.stale_node_interval(),
            config.dead_node_interval(),
            Arc::clone(&metrics),
        ));
        let mapping = Arc::new(ContainerMapping::new(
            container_store,
            Arc::clone(&nodes),
            placement,
            Arc::clone(&metrics),
        ));
        let blocks = Arc::new(BlockManager::new(
            block_store,
            Arc::clone(&mapping),
            Arc::clone(&nodes),
            config.container_size_bytes,
            config.block_deletion_max_retry,
            Arc::clone(&metrics),
        )?);
        Ok(Arc::new(Self {
            config,
            nodes,
            mapping,
            blocks,
            metrics,
        }))
    }

    /// Open the SCM over its two stores under `dir`.
    pub fn open<P: AsRef<Path>>(
        config: OzoneConfig,
        dir: P,
        metrics: Arc<ScmMetrics>,
    ) -> Result<Arc<Self>, ScmError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|source| ScmError::Bind {
            addr: dir.display().to_string(),
            source,
        })?;
        let container_store = MetaStore::open(dir.join("containers.db"))?;
        let block_store = MetaStore::open(dir.join("blocks.db"))?;
        Self::new(config, container_store, block_store, metrics)
    }

    /// Bind both RPC surfaces and start the liveness/deletion sweeper.
    /// Returns the bound (client, datanode) addresses.
    pub async fn start(self: &Arc<Self>) -> Result<(SocketAddr, SocketAddr), ScmError> {
        let client_listener = bind(&self.config.scm_address).await?;
        let datanode_listener = bind(&self.config.scm_datanode_address).await?;
        let client_addr = local_addr(&client_listener, &self.config.scm_address)?;
        let datanode_addr = local_addr(&datanode_listener, &self.config.scm_datanode_address)?;

        let handler_count = self.config.scm_handler_count;
        tokio::spawn(protocol::server::serve(
            client_listener,
            Arc::new(ScmClientHandler::new(Arc::clone(self))),
            handler_count,
        ));
        tokio::spawn(protocol::server::serve(
            datanode_listener,
            Arc::new(ScmDatanodeHandler::new(Arc::clone(self))),
            handler_count,
        ));

        let sweeper = Arc::clone(self);
        let sweep_interval = self.config.node_sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            loop {
                ticker.tick().await;
                sweeper.nodes.sweep();
                sweeper.blocks.retry_sweep();
            }
        });

        info!(
            cluster_id = self.nodes.cluster_id(),
            client = %client_addr,
            datanode = %datanode_addr,
            "SCM started"
        );
        Ok((client_addr, datanode_addr))
    }

    pub fn nodes(&self) -> &Arc<NodeManager> {
        &self.nodes
    }

    pub fn mapping(&self) -> &Arc<ContainerMapping> {
        &self.mapping
    }

    pub fn blocks(&self) -> &Arc<BlockManager> {
        &self.blocks
    }

    pub fn metrics(&self) -> &Arc<ScmMetrics> {
        &self.metrics
    }
}

async fn bind(addr: &str) -> Result<TcpListener, ScmError> {
    TcpListener::bind(addr).await.map_err(|source| ScmError::Bind {
        addr: addr.to_string(),
        source,
    })
}

fn local_addr(listener: &TcpListener, addr: &str) -> Result<SocketAddr, ScmError> {
    listener.local_addr().map_err(|source| ScmError::Bind {
        addr: addr.to_string(),
        source,
    })
}
