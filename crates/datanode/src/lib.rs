//! Datanode: serves the container data plane and keeps itself joined to the
//! SCM through the endpoint state machine.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use common::config::OzoneConfig;
use common::{DatanodeDetails, DatanodeId, DeletedBlocksTransaction};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::info;

pub mod chunk_store;
pub mod endpoint;
pub mod error;
pub mod server;

pub use chunk_store::ContainerStore;
pub use endpoint::{EndpointState, EndpointStateMachine};
pub use error::ContainerError;

use server::DataHandler;

pub struct DatanodeService {
    details: DatanodeDetails,
    store: Arc<ContainerStore>,
    endpoint: Arc<EndpointStateMachine>,
    data_addr: SocketAddr,
}

impl DatanodeService {
    /// Bind the data-plane listener, then join the SCM: spawns the serving
    /// loop, the command executor, and the endpoint tick task.
    pub async fn start<P: AsRef<Path>>(
        config: OzoneConfig,
        root: P,
    ) -> anyhow::Result<Arc<Self>> {
        let store = Arc::new(ContainerStore::open(root)?);

        let listener = TcpListener::bind(&config.datanode_address).await?;
        let data_addr = listener.local_addr()?;
        let details = DatanodeDetails {
            id: DatanodeId::new(),
            host_name: std::env::var("OZONE_DATANODE_HOST")
                .unwrap_or_else(|_| "localhost".to_string()),
            ip_address: data_addr.ip().to_string(),
            container_port: data_addr.port(),
        };

        tokio::spawn(protocol::server::serve(
            listener,
            Arc::new(DataHandler::new(Arc::clone(&store))),
            config.scm_handler_count,
        ));

        let (deletions_tx, deletions_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_command_executor(Arc::clone(&store), deletions_rx));

        let endpoint = EndpointStateMachine::new(
            config.scm_datanode_address.clone(),
            details.clone(),
            Arc::clone(&store),
            deletions_tx,
            config.endpoint_miss_limit,
            config.rpc_timeout(),
        );
        tokio::spawn(Arc::clone(&endpoint).run(config.heartbeat_interval()));

        info!(
            datanode = %details.id,
            data = %data_addr,
            scm = %config.scm_datanode_address,
            "datanode started"
        );
        Ok(Arc::new(Self {
            details,
            store,
            endpoint,
            data_addr,
        }))
    }

    pub fn details(&self) -> &DatanodeDetails {
        &self.details
    }

    pub fn store(&self) -> &Arc<ContainerStore> {
        &self.store
    }

    pub fn endpoint(&self) -> &Arc<EndpointStateMachine> {
        &self.endpoint
    }

    pub fn data_addr(&self) -> SocketAddr {
        self.data_addr
    }

    pub fn shutdown(&self) {
        self.endpoint.shutdown();
    }
}

async fn run_command_executor(
    store: Arc<ContainerStore>,
    mut deletions: mpsc::UnboundedReceiver<Vec<DeletedBlocksTransaction>>,
) {
    while let Some(transactions) = deletions.recv().await {
        store.apply_delete_transactions(&transactions);
    }
}
