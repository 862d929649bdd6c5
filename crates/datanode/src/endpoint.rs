//! Per-SCM-endpoint state machine: GetVersion → Register → Heartbeat with
//! miss-count escalation and a terminal Shutdown state.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use common::{DatanodeDetails, DeletedBlocksTransaction, NodeStat};
use protocol::client::EndpointClient;
use protocol::datanode::{DatanodeResponse, ScmCommand};
use protocol::PROTOCOL_VERSION;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use crate::chunk_store::ContainerStore;

/// Advertised capacity for the node stat until real disk accounting exists.
const DEFAULT_CAPACITY_BYTES: u64 = 1 << 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    GetVersion,
    Register,
    Heartbeat,
    Shutdown,
}

pub struct EndpointStateMachine {
    scm_addr: String,
    details: DatanodeDetails,
    store: Arc<ContainerStore>,
    deletions: UnboundedSender<Vec<DeletedBlocksTransaction>>,
    // Exclusive per-tick lock: state reads/writes are serialized with the
    // delivery of each tick's RPC result. Holds the reusable connection.
    tick_lock: tokio::sync::Mutex<Option<EndpointClient>>,
    state: Mutex<EndpointState>,
    missed: AtomicU32,
    miss_limit: u32,
    rpc_timeout: Duration,
    stop: AtomicBool,
}

impl EndpointStateMachine {
    pub fn new(
        scm_addr: String,
        details: DatanodeDetails,
        store: Arc<ContainerStore>,
        deletions: UnboundedSender<Vec<DeletedBlocksTransaction>>,
        miss_limit: u32,
        rpc_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            scm_addr,
            details,
            store,
            deletions,
            tick_lock: tokio::sync::Mutex::new(None),
            state: Mutex::new(EndpointState::GetVersion),
            missed: AtomicU32::new(0),
            miss_limit,
            rpc_timeout,
            stop: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> EndpointState {
        *self.state.lock().expect("endpoint state lock poisoned")
    }

    fn set_state(&self, next: EndpointState) {
        let mut state = self.state.lock().expect("endpoint state lock poisoned");
        if *state != next {
            debug!(endpoint = %self.scm_addr, from = ?*state, to = ?next, "endpoint transition");
            *state = next;
        }
    }

    /// Request a stop; takes effect between ticks.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Tick loop. Each tick runs under the exclusive endpoint lock with a
    /// deadline equal to the tick interval; exceeding it counts as a miss.
    pub async fn run(self: Arc<Self>, interval: Duration) {
        info!(endpoint = %self.scm_addr, datanode = %self.details.id, "endpoint task started");
        loop {
            if self.stop.load(Ordering::SeqCst) {
                break;
            }
            self.tick(interval).await;
            if self.state() == EndpointState::Shutdown {
                break;
            }
            tokio::time::sleep(interval).await;
        }
        info!(endpoint = %self.scm_addr, "endpoint task stopped");
    }

    pub async fn tick(&self, deadline: Duration) {
        let mut conn = self.tick_lock.lock().await;
        match tokio::time::timeout(deadline, self.tick_inner(&mut conn)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                *conn = None;
                self.record_miss(&format!("{:#}", e));
            }
            Err(_) => {
                *conn = None;
                self.record_miss("tick deadline exceeded");
            }
        }
    }

    async fn tick_inner(&self, conn: &mut Option<EndpointClient>) -> Result<()> {
        if conn.is_none() {
            *conn = Some(EndpointClient::connect(&self.scm_addr, self.rpc_timeout).await?);
        }
        let client = conn.as_mut().expect("connection just established");

        match self.state() {
            EndpointState::GetVersion => match client.get_version().await? {
                DatanodeResponse::Version { version, .. } if version == PROTOCOL_VERSION => {
                    self.set_state(EndpointState::Register);
                }
                DatanodeResponse::Version { version, .. } => {
                    error!(
                        endpoint = %self.scm_addr,
                        remote = version,
                        local = PROTOCOL_VERSION,
                        "protocol version mismatch"
                    );
                    self.set_state(EndpointState::Shutdown);
                }
                other => bail!("unexpected GetVersion response: {:?}", other),
            },
            EndpointState::Register => {
                let report = self.store.container_report().unwrap_or_default();
                match client
                    .register(self.details.clone(), self.node_stat(), report)
                    .await?
                {
                    DatanodeResponse::Registered {
                        datanode_id,
                        cluster_id,
                        ..
                    } => {
                        if datanode_id != self.details.id || cluster_id.is_empty() {
                            // Identity mismatch is fatal for this endpoint.
                            error!(
                                endpoint = %self.scm_addr,
                                expected = %self.details.id,
                                got = %datanode_id,
                                "registration identity mismatch"
                            );
                            self.set_state(EndpointState::Shutdown);
                        } else {
                            info!(endpoint = %self.scm_addr, cluster_id = %cluster_id, "registered");
                            self.missed.store(0, Ordering::SeqCst);
                            self.set_state(EndpointState::Heartbeat);
                        }
                    }
                    DatanodeResponse::Error { code, message } => {
                        error!(
                            endpoint = %self.scm_addr,
                            ?code,
                            detail = %message,
                            "registration rejected"
                        );
                        self.set_state(EndpointState::Shutdown);
                    }
                    other => bail!("unexpected Register response: {:?}", other),
                }
            }
            EndpointState::Heartbeat => {
                match client.heartbeat(self.details.id, self.node_stat()).await? {
                    DatanodeResponse::Heartbeat { commands } => {
                        self.missed.store(0, Ordering::SeqCst);
                        for command in commands {
                            self.dispatch(command);
                        }
                    }
                    other => bail!("unexpected Heartbeat response: {:?}", other),
                }
            }
            EndpointState::Shutdown => {}
        }
        Ok(())
    }

    fn dispatch(&self, command: ScmCommand) {
        match command {
            ScmCommand::DeleteBlocks { transactions } => {
                if self.deletions.send(transactions).is_err() {
                    warn!(endpoint = %self.scm_addr, "command executor is gone");
                }
            }
            ScmCommand::Reregister => {
                info!(endpoint = %self.scm_addr, "SCM requested re-registration");
                self.set_state(EndpointState::Register);
            }
            ScmCommand::Shutdown => {
                warn!(endpoint = %self.scm_addr, "SCM commanded shutdown");
                self.set_state(EndpointState::Shutdown);
                self.shutdown();
            }
        }
    }

    fn record_miss(&self, reason: &str) {
        let missed = self.missed.fetch_add(1, Ordering::SeqCst) + 1;
        warn!(endpoint = %self.scm_addr, missed, reason, "endpoint tick failed");
        if missed >= self.miss_limit && self.state() == EndpointState::Heartbeat {
            warn!(
                endpoint = %self.scm_addr,
                missed,
                "miss limit reached, falling back to registration"
            );
            self.missed.store(0, Ordering::SeqCst);
            self.set_state(EndpointState::Register);
        }
    }

    fn node_stat(&self) -> NodeStat {
        let used = self.store.used_bytes();
        NodeStat::new(
            DEFAULT_CAPACITY_BYTES,
            used,
            DEFAULT_CAPACITY_BYTES.saturating_sub(used),
        )
    }
}
