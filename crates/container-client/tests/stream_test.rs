use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::config::OzoneConfig;
use common::{DatanodeDetails, DatanodeId, Pipeline, ReplicationFactor, ReplicationType};
use container_client::{
    ensure_container, get_small_file, put_small_file, ChunkInputStream, ChunkOutputStream,
    ClientError, XceiverClientManager,
};
use datanode::server::DataHandler;
use datanode::ContainerStore;
use tokio::net::TcpListener;

fn test_dir(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("ozone-stream-{}-{}", tag, uuid::Uuid::new_v4()))
}

/// Serve a bare container store and return a single-member pipeline for it.
async fn start_datanode(tag: &str) -> (Pipeline, PathBuf) {
    let dir = test_dir(tag);
    let store = Arc::new(ContainerStore::open(&dir).unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(protocol::server::serve(
        listener,
        Arc::new(DataHandler::new(store)),
        8,
    ));

    let member = DatanodeDetails {
        id: DatanodeId::new(),
        host_name: "localhost".to_string(),
        ip_address: addr.ip().to_string(),
        container_port: addr.port(),
    };
    let pipeline = Pipeline::new(
        "c1",
        vec![member],
        ReplicationType::Standalone,
        ReplicationFactor::One,
    );
    (pipeline, dir)
}

#[tokio::test]
async fn multi_chunk_write_read_round_trip() {
    let (pipeline, dir) = start_datanode("roundtrip").await;
    let manager = XceiverClientManager::new(&OzoneConfig::default());
    let client = manager.acquire(&pipeline).await.unwrap();

    ensure_container(&client, "c1").await.unwrap();

    // 4096 bytes across 1 KiB chunks: three full chunks plus a tail.
    let payload = vec![0xAB; 4096];
    let mut out = ChunkOutputStream::new(Arc::clone(&client), "c1", "block-1", 1024);
    out.write(&payload[..1000]).await.unwrap();
    out.write(&payload[1000..]).await.unwrap();
    assert_eq!(out.bytes_written(), 4096);
    out.close().await.unwrap();

    let mut input = ChunkInputStream::open(Arc::clone(&client), "c1", "block-1")
        .await
        .unwrap();
    assert_eq!(input.len(), 4096);
    let read_back = input.read_to_end().await.unwrap();
    assert_eq!(read_back, payload);

    // EOF after the full length has been consumed.
    let mut buf = [0u8; 16];
    assert_eq!(input.read(&mut buf).await.unwrap(), 0);

    manager.release(&client).await;
    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn writes_after_close_are_rejected() {
    let (pipeline, dir) = start_datanode("closed").await;
    let manager = XceiverClientManager::new(&OzoneConfig::default());
    let client = manager.acquire(&pipeline).await.unwrap();
    ensure_container(&client, "c1").await.unwrap();

    let mut out = ChunkOutputStream::new(Arc::clone(&client), "c1", "block-1", 1024);
    out.write(b"data").await.unwrap();
    out.close().await.unwrap();
    // Closing again is a no-op; writing is not.
    out.close().await.unwrap();
    assert!(matches!(
        out.write(b"more").await,
        Err(ClientError::StreamClosed)
    ));

    manager.release(&client).await;
    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn missing_key_surfaces_key_not_found() {
    let (pipeline, dir) = start_datanode("missing").await;
    let manager = XceiverClientManager::new(&OzoneConfig::default());
    let client = manager.acquire(&pipeline).await.unwrap();
    ensure_container(&client, "c1").await.unwrap();

    let err = ChunkInputStream::open(Arc::clone(&client), "c1", "no-such-key")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClientError::Remote {
            result: protocol::container::ContainerResult::KeyNotFound,
            ..
        }
    ));

    manager.release(&client).await;
    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn small_file_single_round_trip() {
    let (pipeline, dir) = start_datanode("smallfile").await;
    let manager = XceiverClientManager::new(&OzoneConfig::default());
    let client = manager.acquire(&pipeline).await.unwrap();
    ensure_container(&client, "c1").await.unwrap();

    let payload = b"small enough to inline".to_vec();
    put_small_file(&client, "c1", "block-sf", &payload)
        .await
        .unwrap();
    let read_back = get_small_file(&client, "c1", "block-sf").await.unwrap();
    assert_eq!(read_back, payload);

    manager.release(&client).await;
    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn manager_pools_one_client_per_leader() {
    let (pipeline, dir) = start_datanode("pool").await;
    let manager = XceiverClientManager::new(&OzoneConfig::default());

    let a = manager.acquire(&pipeline).await.unwrap();
    let b = manager.acquire(&pipeline).await.unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(manager.pooled_count().await, 1);

    manager.release(&a).await;
    manager.release(&b).await;
    // Still pooled inside the idle grace window.
    assert_eq!(manager.pooled_count().await, 1);

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn async_send_decrements_pending_gauge() {
    let (pipeline, dir) = start_datanode("async").await;
    let manager = XceiverClientManager::new(&OzoneConfig::default());
    let client = manager.acquire(&pipeline).await.unwrap();
    ensure_container(&client, "c1").await.unwrap();

    let rx = client.send_command_async(protocol::container::ContainerRequest::ReadContainer {
        container_name: "c1".to_string(),
    });
    let response = rx.await.unwrap().unwrap();
    assert!(matches!(
        response,
        protocol::container::ContainerResponse::Container { .. }
    ));
    assert_eq!(client.metrics().pending_other.load(Ordering::Relaxed), 0);
    assert!(client.metrics().total_sent.load(Ordering::Relaxed) >= 1);

    manager.release(&client).await;
    let _ = std::fs::remove_dir_all(dir);
}
