use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use common::config::OzoneConfig;
use common::{NodeState, ReplicationFactor, ReplicationType};
use datanode::{DatanodeService, EndpointState};
use scm::metrics::ScmMetrics;
use scm::{ScmError, StorageContainerManager};

fn test_dir(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("ozone-endpoint-{}-{}", tag, uuid::Uuid::new_v4()))
}

fn test_config() -> OzoneConfig {
    OzoneConfig {
        scm_address: "127.0.0.1:0".to_string(),
        scm_datanode_address: "127.0.0.1:0".to_string(),
        ksm_address: "127.0.0.1:0".to_string(),
        datanode_address: "127.0.0.1:0".to_string(),
        heartbeat_interval_ms: 50,
        stale_node_interval_ms: 200,
        dead_node_interval_ms: 500,
        node_sweep_interval_ms: 40,
        rpc_timeout_ms: 2_000,
        ..Default::default()
    }
}

async fn wait_for<F: Fn() -> bool>(what: &str, condition: F) {
    for _ in 0..250 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {}", what);
}

#[tokio::test]
async fn datanode_joins_and_heartbeats() {
    let dir = test_dir("join");
    let mut config = test_config();
    let scm = StorageContainerManager::open(
        config.clone(),
        dir.join("scm"),
        Arc::new(ScmMetrics::new()),
    )
    .unwrap();
    let (_, scm_dn_addr) = scm.start().await.unwrap();
    config.scm_datanode_address = scm_dn_addr.to_string();

    let datanode = DatanodeService::start(config, dir.join("dn")).await.unwrap();
    let id = datanode.details().id;

    wait_for("endpoint to reach heartbeat state", || {
        datanode.endpoint().state() == EndpointState::Heartbeat
            && scm.nodes().state_of(id) == Some(NodeState::Healthy)
    })
    .await;

    assert_eq!(scm.nodes().node_count(), 1);
    let healthy = scm.nodes().node_report(Some(NodeState::Healthy));
    assert_eq!(healthy.len(), 1);
    assert_eq!(healthy[0].0.id, id);

    datanode.shutdown();
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn silent_datanode_is_declared_stale_then_dead() {
    let dir = test_dir("silent");
    let mut config = test_config();
    let scm = StorageContainerManager::open(
        config.clone(),
        dir.join("scm"),
        Arc::new(ScmMetrics::new()),
    )
    .unwrap();
    let (_, scm_dn_addr) = scm.start().await.unwrap();
    config.scm_datanode_address = scm_dn_addr.to_string();

    let datanode = DatanodeService::start(config, dir.join("dn")).await.unwrap();
    let id = datanode.details().id;

    wait_for("registration", || {
        scm.nodes().state_of(id) == Some(NodeState::Healthy)
    })
    .await;

    // Stop heartbeats; the sweeper must degrade the node in order.
    datanode.shutdown();
    wait_for("stale transition", || {
        scm.nodes().state_of(id) == Some(NodeState::Stale)
    })
    .await;
    assert_eq!(scm.nodes().node_report(Some(NodeState::Stale)).len(), 1);

    wait_for("dead transition", || {
        scm.nodes().state_of(id) == Some(NodeState::Dead)
    })
    .await;
    assert_eq!(scm.nodes().node_report(Some(NodeState::Dead)).len(), 1);

    // The only node is dead: placement has nothing to offer.
    let err = scm
        .mapping()
        .allocate("c-after-death", ReplicationType::Standalone, ReplicationFactor::One)
        .unwrap_err();
    assert!(matches!(err, ScmError::InsufficientNodes { .. }));

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn deletion_commands_reach_the_datanode() {
    let dir = test_dir("delete");
    let mut config = test_config();
    let scm = StorageContainerManager::open(
        config.clone(),
        dir.join("scm"),
        Arc::new(ScmMetrics::new()),
    )
    .unwrap();
    let (_, scm_dn_addr) = scm.start().await.unwrap();
    config.scm_datanode_address = scm_dn_addr.to_string();

    let datanode = DatanodeService::start(config, dir.join("dn")).await.unwrap();
    wait_for("registration", || {
        datanode.endpoint().state() == EndpointState::Heartbeat
    })
    .await;

    // Allocate a block, seed the datanode with its key, then delete it
    // through SCM and watch the command take effect locally.
    let block = scm.blocks().allocate_block(64).unwrap();
    let container = block.pipeline.container_name.clone();
    datanode.store().create_container(&container).unwrap();
    datanode
        .store()
        .put_key(&common::KeyData {
            container_name: container.clone(),
            name: block.block_key.clone(),
            chunks: vec![],
            metadata: Default::default(),
        })
        .unwrap();

    let results = scm.blocks().delete_blocks(vec![block.block_key.clone()]).unwrap();
    assert_eq!(results.len(), 1);

    let store = datanode.store().clone();
    let container_probe = container.clone();
    wait_for("block deletion on the datanode", move || {
        store
            .read_container(&container_probe)
            .map(|s| s.key_count == 0)
            .unwrap_or(false)
    })
    .await;

    datanode.shutdown();
    let _ = std::fs::remove_dir_all(&dir);
}
