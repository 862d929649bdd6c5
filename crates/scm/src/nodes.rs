//! Datanode registry and the heartbeat liveness state machine.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use common::{DatanodeDetails, DatanodeId, NodeState, NodeStat};
use protocol::datanode::ScmCommand;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ScmError;
use crate::metrics::ScmMetrics;

struct NodeEntry {
    details: DatanodeDetails,
    stat: NodeStat,
    state: NodeState,
    // Monotonic; liveness never consults wall-clock time.
    last_heartbeat: Instant,
}

/// Authoritative view of datanode membership and liveness.
///
/// Transitions are monotonic within a heartbeat epoch: a DEAD node is only
/// restored by a successful re-registration, never by a stray heartbeat.
pub struct NodeManager {
    cluster_id: String,
    nodes: RwLock<HashMap<DatanodeId, NodeEntry>>,
    commands: Mutex<HashMap<DatanodeId, VecDeque<ScmCommand>>>,
    stale_after: Duration,
    dead_after: Duration,
    metrics: Arc<ScmMetrics>,
}

impl NodeManager {
    pub fn new(
        cluster_id: String,
        stale_after: Duration,
        dead_after: Duration,
        metrics: Arc<ScmMetrics>,
    ) -> Self {
        Self {
            cluster_id,
            nodes: RwLock::new(HashMap::new()),
            commands: Mutex::new(HashMap::new()),
            stale_after,
            dead_after,
            metrics,
        }
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    /// Admit (or re-admit) a datanode. Registration is the only path back to
    /// HEALTHY for a node that was declared DEAD.
    pub fn register(
        &self,
        details: DatanodeDetails,
        stat: NodeStat,
    ) -> Result<(), ScmError> {
        if details.id.as_uuid() == &Uuid::nil() {
            return Err(ScmError::InvalidRegistration(
                "datanode UUID must not be nil".to_string(),
            ));
        }
        if details.host_name.is_empty() || details.ip_address.is_empty() {
            return Err(ScmError::InvalidRegistration(format!(
                "blank host or address for {}",
                details.id
            )));
        }

        let mut nodes = self.nodes.write().expect("node registry lock poisoned");
        let id = details.id;
        let rejoined = nodes.contains_key(&id);
        nodes.insert(
            id,
            NodeEntry {
                details,
                stat,
                state: NodeState::Healthy,
                last_heartbeat: Instant::now(),
            },
        );
        drop(nodes);

        self.metrics.registrations.fetch_add(1, Ordering::Relaxed);
        info!(datanode = %id, rejoined, "datanode registered");
        Ok(())
    }

    /// Record a heartbeat and drain any queued commands for the node.
    pub fn heartbeat(&self, id: DatanodeId, stat: NodeStat) -> Vec<ScmCommand> {
        self.metrics.heartbeats.fetch_add(1, Ordering::Relaxed);

        let mut commands = Vec::new();
        let mut nodes = self.nodes.write().expect("node registry lock poisoned");
        match nodes.get_mut(&id) {
            Some(entry) if entry.state == NodeState::Dead => {
                // A heartbeat cannot resurrect a DEAD node.
                debug!(datanode = %id, "heartbeat from dead node, requesting re-registration");
                commands.push(ScmCommand::Reregister);
            }
            Some(entry) => {
                entry.stat = stat;
                entry.last_heartbeat = Instant::now();
                if entry.state == NodeState::Stale {
                    info!(datanode = %id, "stale node recovered");
                }
                if matches!(entry.state, NodeState::Healthy | NodeState::Stale) {
                    entry.state = NodeState::Healthy;
                }
            }
            None => {
                debug!(datanode = %id, "heartbeat from unknown node");
                commands.push(ScmCommand::Reregister);
            }
        }
        drop(nodes);

        let mut queues = self.commands.lock().expect("command queue lock poisoned");
        if let Some(queue) = queues.get_mut(&id) {
            commands.extend(queue.drain(..));
        }
        commands
    }

    /// Periodic liveness evaluation. A long-silent node passes through STALE
    /// on its way to DEAD even when both thresholds have elapsed.
    pub fn sweep(&self) {
        let mut nodes = self.nodes.write().expect("node registry lock poisoned");
        for (id, entry) in nodes.iter_mut() {
            let silent_for = entry.last_heartbeat.elapsed();
            if entry.state == NodeState::Healthy && silent_for > self.stale_after {
                info!(datanode = %id, ?silent_for, "datanode is stale");
                entry.state = NodeState::Stale;
            }
            if entry.state == NodeState::Stale && silent_for > self.dead_after {
                warn!(datanode = %id, ?silent_for, "datanode declared dead");
                entry.state = NodeState::Dead;
            }
        }
    }

    pub fn queue_command(&self, id: DatanodeId, command: ScmCommand) {
        let mut queues = self.commands.lock().expect("command queue lock poisoned");
        queues.entry(id).or_default().push_back(command);
    }

    /// Commands queued for a node and not yet picked up by a heartbeat.
    pub fn pending_command_count(&self, id: DatanodeId) -> usize {
        let queues = self.commands.lock().expect("command queue lock poisoned");
        queues.get(&id).map(|q| q.len()).unwrap_or(0)
    }

    pub fn healthy_nodes(&self) -> Vec<(DatanodeDetails, NodeStat)> {
        let nodes = self.nodes.read().expect("node registry lock poisoned");
        nodes
            .values()
            .filter(|e| e.state == NodeState::Healthy)
            .map(|e| (e.details.clone(), e.stat))
            .collect()
    }

    /// Node report, optionally filtered to one state.
    pub fn node_report(
        &self,
        state: Option<NodeState>,
    ) -> Vec<(DatanodeDetails, NodeState, NodeStat)> {
        let nodes = self.nodes.read().expect("node registry lock poisoned");
        nodes
            .values()
            .filter(|e| state.map(|s| e.state == s).unwrap_or(true))
            .map(|e| (e.details.clone(), e.state, e.stat))
            .collect()
    }

    pub fn state_of(&self, id: DatanodeId) -> Option<NodeState> {
        let nodes = self.nodes.read().expect("node registry lock poisoned");
        nodes.get(&id).map(|e| e.state)
    }

    pub fn node_count(&self) -> usize {
        let nodes = self.nodes.read().expect("node registry lock poisoned");
        nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(stale_ms: u64, dead_ms: u64) -> NodeManager {
        NodeManager::new(
            "cluster-test".to_string(),
            Duration::from_millis(stale_ms),
            Duration::from_millis(dead_ms),
            Arc::new(ScmMetrics::new()),
        )
    }

    fn details() -> DatanodeDetails {
        DatanodeDetails {
            id: DatanodeId::new(),
            host_name: "dn1".to_string(),
            ip_address: "127.0.0.1".to_string(),
            container_port: 9870,
        }
    }

    #[test]
    fn register_then_heartbeat_stays_healthy() {
        let manager = manager(50, 100);
        let dn = details();
        manager.register(dn.clone(), NodeStat::default()).unwrap();
        assert_eq!(manager.state_of(dn.id), Some(NodeState::Healthy));

        let commands = manager.heartbeat(dn.id, NodeStat::default());
        assert!(commands.is_empty());
        assert_eq!(manager.state_of(dn.id), Some(NodeState::Healthy));
    }

    #[test]
    fn silent_node_goes_stale_then_dead_in_order() {
        let manager = manager(30, 80);
        let dn = details();
        manager.register(dn.clone(), NodeStat::default()).unwrap();

        std::thread::sleep(Duration::from_millis(45));
        manager.sweep();
        assert_eq!(manager.state_of(dn.id), Some(NodeState::Stale));

        std::thread::sleep(Duration::from_millis(50));
        manager.sweep();
        assert_eq!(manager.state_of(dn.id), Some(NodeState::Dead));
    }

    #[test]
    fn heartbeat_revives_stale_but_not_dead() {
        let manager = manager(20, 40);
        let dn = details();
        manager.register(dn.clone(), NodeStat::default()).unwrap();

        std::thread::sleep(Duration::from_millis(30));
        manager.sweep();
        assert_eq!(manager.state_of(dn.id), Some(NodeState::Stale));
        manager.heartbeat(dn.id, NodeStat::default());
        assert_eq!(manager.state_of(dn.id), Some(NodeState::Healthy));

        std::thread::sleep(Duration::from_millis(60));
        manager.sweep();
        assert_eq!(manager.state_of(dn.id), Some(NodeState::Dead));

        let commands = manager.heartbeat(dn.id, NodeStat::default());
        assert_eq!(commands, vec![ScmCommand::Reregister]);
        assert_eq!(manager.state_of(dn.id), Some(NodeState::Dead));

        // Only registration restores the node.
        manager.register(dn.clone(), NodeStat::default()).unwrap();
        assert_eq!(manager.state_of(dn.id), Some(NodeState::Healthy));
    }

    #[test]
    fn unknown_heartbeat_requests_reregistration() {
        let manager = manager(50, 100);
        let commands = manager.heartbeat(DatanodeId::new(), NodeStat::default());
        assert_eq!(commands, vec![ScmCommand::Reregister]);
    }

    #[test]
    fn blank_host_is_invalid_registration() {
        let manager = manager(50, 100);
        let mut dn = details();
        dn.host_name.clear();
        let err = manager.register(dn, NodeStat::default()).unwrap_err();
        assert!(matches!(err, ScmError::InvalidRegistration(_)));
    }

    #[test]
    fn queued_commands_are_drained_once() {
        let manager = manager(50, 100);
        let dn = details();
        manager.register(dn.clone(), NodeStat::default()).unwrap();
        manager.queue_command(dn.id, ScmCommand::Reregister);
        assert_eq!(manager.pending_command_count(dn.id), 1);

        let commands = manager.heartbeat(dn.id, NodeStat::default());
        assert_eq!(commands.len(), 1);
        assert_eq!(manager.pending_command_count(dn.id), 0);
        assert!(manager.heartbeat(dn.id, NodeStat::default()).is_empty());
    }
}
