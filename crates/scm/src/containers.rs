//! Container registry: name → pipeline and lifecycle state, persisted in the
//! SCM container store.

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use common::{
    ContainerInfo, ContainerState, DatanodeId, Pipeline, ReplicationFactor, ReplicationType,
};
use meta_store::MetaStore;
use tracing::{debug, info};

use crate::error::ScmError;
use crate::metrics::ScmMetrics;
use crate::nodes::NodeManager;
use crate::placement::PlacementPolicy;

pub struct ContainerMapping {
    store: MetaStore,
    nodes: Arc<NodeManager>,
    placement: PlacementPolicy,
    // Serializes pick-or-create sequences; held only across registry ops,
    // never across RPC.
    alloc_lock: Mutex<()>,
    metrics: Arc<ScmMetrics>,
}

impl ContainerMapping {
    pub fn new(
        store: MetaStore,
        nodes: Arc<NodeManager>,
        placement: PlacementPolicy,
        metrics: Arc<ScmMetrics>,
    ) -> Self {
        Self {
            store,
            nodes,
            placement,
            alloc_lock: Mutex::new(()),
            metrics,
        }
    }

    /// Allocate a container: place a pipeline on healthy datanodes and
    /// persist the record in state ALLOCATED.
    pub fn allocate(
        &self,
        container_name: &str,
        replication_type: ReplicationType,
        factor: ReplicationFactor,
    ) -> Result<Pipeline, ScmError> {
        let _guard = self.alloc_lock.lock().expect("container lock poisoned");

        if self.store.get(container_name.as_bytes())?.is_some() {
            return Err(ScmError::ContainerExists(container_name.to_string()));
        }

        let excluded = self.members_of_type(replication_type)?;
        let healthy = self.nodes.healthy_nodes();
        let members = self
            .placement
            .choose(&healthy, factor.count(), &excluded)
            .map_err(|e| {
                self.metrics.allocation_failures.fetch_add(1, Ordering::Relaxed);
                e
            })?;

        let pipeline = Pipeline::new(container_name, members, replication_type, factor);
        let info = ContainerInfo {
            container_name: container_name.to_string(),
            state: ContainerState::Allocated,
            pipeline: pipeline.clone(),
            used_bytes: 0,
        };
        self.store
            .put(container_name.as_bytes(), &serde_json::to_vec(&info)?)?;

        self.metrics
            .containers_allocated
            .fetch_add(1, Ordering::Relaxed);
        info!(
            container = container_name,
            leader = %pipeline.leader,
            members = pipeline.members.len(),
            "container allocated"
        );
        Ok(pipeline)
    }

    pub fn get(&self, container_name: &str) -> Result<Pipeline, ScmError> {
        Ok(self.get_info(container_name)?.pipeline)
    }

    pub fn get_info(&self, container_name: &str) -> Result<ContainerInfo, ScmError> {
        match self.store.get(container_name.as_bytes())? {
            Some(raw) => Ok(serde_json::from_slice(&raw)?),
            None => Err(ScmError::ContainerNotFound(container_name.to_string())),
        }
    }

    /// Delete a container record. Deleting an absent container succeeds and
    /// mutates nothing.
    pub fn delete(&self, container_name: &str) -> Result<(), ScmError> {
        let _guard = self.alloc_lock.lock().expect("container lock poisoned");
        if self.store.get(container_name.as_bytes())?.is_none() {
            debug!(container = container_name, "delete of absent container");
            return Ok(());
        }
        self.store.delete(container_name.as_bytes())?;
        self.metrics
            .containers_deleted
            .fetch_add(1, Ordering::Relaxed);
        info!(container = container_name, "container deleted");
        Ok(())
    }

    pub fn update_state(
        &self,
        container_name: &str,
        state: ContainerState,
    ) -> Result<(), ScmError> {
        let mut info = self.get_info(container_name)?;
        info.state = state;
        self.store
            .put(container_name.as_bytes(), &serde_json::to_vec(&info)?)?;
        Ok(())
    }

    pub fn add_used_bytes(&self, container_name: &str, delta: u64) -> Result<(), ScmError> {
        let mut info = self.get_info(container_name)?;
        info.used_bytes = info.used_bytes.saturating_add(delta);
        self.store
            .put(container_name.as_bytes(), &serde_json::to_vec(&info)?)?;
        Ok(())
    }

    /// All container records currently in the given state.
    pub fn containers_in_state(
        &self,
        state: ContainerState,
    ) -> Result<Vec<ContainerInfo>, ScmError> {
        let mut found = Vec::new();
        for (_, raw) in self.store.iter(None) {
            let info: ContainerInfo = serde_json::from_slice(&raw)?;
            if info.state == state {
                found.push(info);
            }
        }
        Ok(found)
    }

    /// Datanodes already serving a live pipeline of the given type; placement
    /// prefers to avoid them.
    fn members_of_type(
        &self,
        replication_type: ReplicationType,
    ) -> Result<HashSet<DatanodeId>, ScmError> {
        let mut members = HashSet::new();
        for (_, raw) in self.store.iter(None) {
            let info: ContainerInfo = serde_json::from_slice(&raw)?;
            if info.pipeline.replication_type != replication_type {
                continue;
            }
            if matches!(
                info.state,
                ContainerState::Deleted | ContainerState::Closed
            ) {
                continue;
            }
            members.extend(info.pipeline.members.iter().map(|m| m.id));
        }
        Ok(members)
    }
}
