//! Container data-plane protocol: client↔datanode messages.

use common::{ChunkInfo, KeyData};
use serde::{Deserialize, Serialize};

use crate::codec::hex_bytes;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContainerRequest {
    CreateContainer {
        container_name: String,
    },
    ReadContainer {
        container_name: String,
    },
    DeleteContainer {
        container_name: String,
        force: bool,
    },
    WriteChunk {
        container_name: String,
        key_name: String,
        chunk: ChunkInfo,
        #[serde(with = "hex_bytes")]
        data: Vec<u8>,
    },
    ReadChunk {
        container_name: String,
        key_name: String,
        chunk: ChunkInfo,
    },
    PutKey {
        key_data: KeyData,
    },
    GetKey {
        container_name: String,
        key_name: String,
    },
    /// Chunk write and key commit in one round trip for small payloads.
    PutSmallFile {
        key_data: KeyData,
        chunk: ChunkInfo,
        #[serde(with = "hex_bytes")]
        data: Vec<u8>,
    },
    GetSmallFile {
        container_name: String,
        key_name: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerResult {
    Success,
    ContainerNotFound,
    ContainerExists,
    ContainerNotEmpty,
    KeyNotFound,
    ChunkNotFound,
    ChecksumMismatch,
    IoError,
    InvalidRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub container_name: String,
    pub key_count: u64,
    pub used_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContainerResponse {
    Error {
        result: ContainerResult,
        message: String,
    },
    Success,
    Container {
        status: ContainerStatus,
    },
    Chunk {
        chunk: ChunkInfo,
        #[serde(with = "hex_bytes")]
        data: Vec<u8>,
    },
    Key {
        key_data: KeyData,
    },
    SmallFile {
        key_data: KeyData,
        #[serde(with = "hex_bytes")]
        data: Vec<u8>,
    },
}
