//! End-to-end: SCM + datanode + KSM over real sockets, exercising the full
//! put-key path a client would drive.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use common::config::OzoneConfig;
use common::{BucketInfo, KeyArgs, NodeState, StorageType, VolumeArgs};
use container_client::{ensure_container, ChunkInputStream, ChunkOutputStream, XceiverClientManager};
use datanode::DatanodeService;
use ksm::{KeySpaceManager, KsmMetrics, ScmBlockAllocator};
use protocol::client::{KsmClient, ScmClient};
use protocol::ksm::{KsmCallError, KsmRequest, KsmResponse, KsmStatus};
use scm::metrics::ScmMetrics;
use scm::StorageContainerManager;

fn test_dir(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("ozone-cluster-{}-{}", tag, uuid::Uuid::new_v4()))
}

fn test_config() -> OzoneConfig {
    OzoneConfig {
        scm_address: "127.0.0.1:0".to_string(),
        scm_datanode_address: "127.0.0.1:0".to_string(),
        ksm_address: "127.0.0.1:0".to_string(),
        datanode_address: "127.0.0.1:0".to_string(),
        heartbeat_interval_ms: 50,
        stale_node_interval_ms: 5_000,
        dead_node_interval_ms: 10_000,
        node_sweep_interval_ms: 50,
        rpc_timeout_ms: 5_000,
        ..Default::default()
    }
}

struct Cluster {
    datanode: Arc<DatanodeService>,
    ksm_addr: String,
    scm_addr: String,
    config: OzoneConfig,
    dir: PathBuf,
}

async fn start_cluster(tag: &str) -> Cluster {
    let dir = test_dir(tag);
    let mut config = test_config();

    let scm = StorageContainerManager::open(
        config.clone(),
        dir.join("scm"),
        Arc::new(ScmMetrics::new()),
    )
    .unwrap();
    let (scm_client_addr, scm_dn_addr) = scm.start().await.unwrap();
    config.scm_address = scm_client_addr.to_string();
    config.scm_datanode_address = scm_dn_addr.to_string();

    let datanode = DatanodeService::start(config.clone(), dir.join("dn"))
        .await
        .unwrap();
    let id = datanode.details().id;
    for _ in 0..250 {
        if scm.nodes().state_of(id) == Some(NodeState::Healthy) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(scm.nodes().state_of(id), Some(NodeState::Healthy));

    let allocator = Arc::new(ScmBlockAllocator::new(
        config.scm_address.clone(),
        config.rpc_timeout(),
    ));
    let ksm = KeySpaceManager::open(
        config.clone(),
        dir.join("ksm"),
        allocator,
        Arc::new(KsmMetrics::new()),
    )
    .unwrap();
    let ksm_addr = ksm.start().await.unwrap().to_string();

    // The spawned server tasks hold their own Arcs; dropping ours is fine.
    drop(scm);
    drop(ksm);

    Cluster {
        datanode,
        ksm_addr,
        scm_addr: config.scm_address.clone(),
        config,
        dir,
    }
}

impl Cluster {
    fn teardown(&self) {
        self.datanode.shutdown();
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

fn volume_args(volume: &str, owner: &str, quota: Option<u64>) -> VolumeArgs {
    VolumeArgs {
        volume: volume.to_string(),
        owner: owner.to_string(),
        admin: owner.to_string(),
        quota_bytes: quota,
        acls: vec![],
    }
}

fn bucket_info(volume: &str, bucket: &str) -> BucketInfo {
    BucketInfo {
        volume: volume.to_string(),
        bucket: bucket.to_string(),
        acls: vec![],
        versioning: false,
        storage_type: StorageType::Disk,
        created_on: 0,
    }
}

#[tokio::test]
async fn put_key_path_end_to_end() {
    let cluster = start_cluster("putkey").await;
    let mut ksm_client = KsmClient::connect(&cluster.ksm_addr, Duration::from_secs(5))
        .await
        .unwrap();

    // Namespace setup over the wire.
    let response = ksm_client
        .call(&KsmRequest::CreateVolume {
            args: volume_args("v1", "alice", Some(1 << 30)),
        })
        .await
        .unwrap();
    assert!(matches!(response, KsmResponse::Volume { .. }));
    let response = ksm_client
        .call(&KsmRequest::CreateBucket {
            info: bucket_info("v1", "b1"),
        })
        .await
        .unwrap();
    assert!(matches!(response, KsmResponse::Bucket { .. }));

    // Key allocation goes through the real SCM.
    let args = KeyArgs {
        volume: "v1".to_string(),
        bucket: "b1".to_string(),
        key: "k1".to_string(),
        data_size: 4096,
    };
    let allocated = match ksm_client
        .call(&KsmRequest::AllocateKey { args: args.clone() })
        .await
        .unwrap()
    {
        KsmResponse::Key { info } => info,
        other => panic!("unexpected response: {:?}", other),
    };

    // The granted container resolves to a pipeline led by our datanode.
    let mut scm_client = ScmClient::connect(&cluster.scm_addr, Duration::from_secs(5))
        .await
        .unwrap();
    let pipeline = scm_client
        .get_container(&allocated.container_name)
        .await
        .unwrap();
    assert_eq!(pipeline.leader, cluster.datanode.details().id);

    // Data plane: initialize the container if asked to, then stream chunks.
    let manager = XceiverClientManager::new(&cluster.config);
    let client = manager.acquire(&pipeline).await.unwrap();
    if allocated.should_create_container {
        ensure_container(&client, &allocated.container_name)
            .await
            .unwrap();
    }

    let payload = vec![0xAB; 4096];
    let mut out = ChunkOutputStream::new(
        Arc::clone(&client),
        allocated.container_name.clone(),
        allocated.block_key.clone(),
        1024,
    );
    out.write(&payload).await.unwrap();
    out.close().await.unwrap();

    // Lookup returns the same block.
    let looked_up = match ksm_client
        .call(&KsmRequest::LookupKey { args: args.clone() })
        .await
        .unwrap()
    {
        KsmResponse::Key { info } => info,
        other => panic!("unexpected response: {:?}", other),
    };
    assert_eq!(looked_up.block_key, allocated.block_key);
    assert_eq!(looked_up.container_name, allocated.container_name);

    // Read the bytes back; EOF after exactly 4096 bytes.
    let mut input = ChunkInputStream::open(
        Arc::clone(&client),
        looked_up.container_name.clone(),
        looked_up.block_key.clone(),
    )
    .await
    .unwrap();
    let read_back = input.read_to_end().await.unwrap();
    assert_eq!(read_back, payload);
    let mut probe = [0u8; 1];
    assert_eq!(input.read(&mut probe).await.unwrap(), 0);

    manager.release(&client).await;
    cluster.teardown();
}

#[tokio::test]
async fn namespace_scenarios_over_the_wire() {
    let cluster = start_cluster("namespace").await;
    let mut ksm_client = KsmClient::connect(&cluster.ksm_addr, Duration::from_secs(5))
        .await
        .unwrap();

    ksm_client
        .call(&KsmRequest::CreateVolume {
            args: volume_args("v1", "alice", None),
        })
        .await
        .unwrap();

    // Duplicate create is a typed rejection.
    let err = ksm_client
        .call(&KsmRequest::CreateVolume {
            args: volume_args("v1", "alice", None),
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        KsmCallError::Remote {
            status: KsmStatus::VolumeAlreadyExists,
            ..
        }
    ));

    ksm_client
        .call(&KsmRequest::CreateBucket {
            info: bucket_info("v1", "b1"),
        })
        .await
        .unwrap();

    // Volume deletion is blocked until the bucket goes away.
    let err = ksm_client
        .call(&KsmRequest::DeleteVolume {
            volume: "v1".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        KsmCallError::Remote {
            status: KsmStatus::VolumeNotEmpty,
            ..
        }
    ));

    ksm_client
        .call(&KsmRequest::DeleteBucket {
            volume: "v1".to_string(),
            bucket: "b1".to_string(),
        })
        .await
        .unwrap();
    let response = ksm_client
        .call(&KsmRequest::DeleteVolume {
            volume: "v1".to_string(),
        })
        .await
        .unwrap();
    assert!(matches!(response, KsmResponse::Done));

    let err = ksm_client
        .call(&KsmRequest::GetVolumeInfo {
            volume: "v1".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        KsmCallError::Remote {
            status: KsmStatus::VolumeNotFound,
            ..
        }
    ));

    cluster.teardown();
}

#[tokio::test]
async fn every_persisted_key_resolves_through_scm() {
    let cluster = start_cluster("resolve").await;
    let mut ksm_client = KsmClient::connect(&cluster.ksm_addr, Duration::from_secs(5))
        .await
        .unwrap();
    let mut scm_client = ScmClient::connect(&cluster.scm_addr, Duration::from_secs(5))
        .await
        .unwrap();

    ksm_client
        .call(&KsmRequest::CreateVolume {
            args: volume_args("v1", "alice", None),
        })
        .await
        .unwrap();
    ksm_client
        .call(&KsmRequest::CreateBucket {
            info: bucket_info("v1", "b1"),
        })
        .await
        .unwrap();

    for name in ["a", "b", "c"] {
        let info = match ksm_client
            .call(&KsmRequest::AllocateKey {
                args: KeyArgs {
                    volume: "v1".to_string(),
                    bucket: "b1".to_string(),
                    key: name.to_string(),
                    data_size: 512,
                },
            })
            .await
            .unwrap()
        {
            KsmResponse::Key { info } => info,
            other => panic!("unexpected response: {:?}", other),
        };

        // Invariant: the persisted key's block and container both resolve.
        let pipeline = scm_client
            .get_container(&info.container_name)
            .await
            .unwrap();
        assert!(!pipeline.members.is_empty());
        let locations = scm_client
            .get_block_locations(vec![info.block_key.clone()])
            .await
            .unwrap();
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].pipeline.container_name, info.container_name);
    }

    // Healthy-member invariant at allocation time: the only datanode is it.
    let report = scm_client.get_node_report(Some(NodeState::Healthy)).await.unwrap();
    assert_eq!(report.len(), 1);

    cluster.teardown();
}
