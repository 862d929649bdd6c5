use protocol::container::ContainerResult;
use thiserror::Error;

/// Failures raised by the on-disk container store.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Container already exists: {0}")]
    ContainerExists(String),

    #[error("Container not empty: {0}")]
    ContainerNotEmpty(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Chunk not found: {0}")]
    ChunkNotFound(String),

    #[error("Checksum mismatch for chunk {chunk}: expected {expected}, computed {computed}")]
    ChecksumMismatch {
        chunk: String,
        expected: String,
        computed: String,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error during {op}: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl ContainerError {
    pub fn io(op: &'static str, source: std::io::Error) -> Self {
        ContainerError::Io { op, source }
    }

    /// Wire result code for the data-plane response envelope.
    pub fn result(&self) -> ContainerResult {
        match self {
            ContainerError::ContainerNotFound(_) => ContainerResult::ContainerNotFound,
            ContainerError::ContainerExists(_) => ContainerResult::ContainerExists,
            ContainerError::ContainerNotEmpty(_) => ContainerResult::ContainerNotEmpty,
            ContainerError::KeyNotFound(_) => ContainerResult::KeyNotFound,
            ContainerError::ChunkNotFound(_) => ContainerResult::ChunkNotFound,
            ContainerError::ChecksumMismatch { .. } => ContainerResult::ChecksumMismatch,
            ContainerError::InvalidRequest(_) => ContainerResult::InvalidRequest,
            ContainerError::Io { .. } => ContainerResult::IoError,
        }
    }
}
