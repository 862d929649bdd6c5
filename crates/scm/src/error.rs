use meta_store::MetaStoreError;
use protocol::scm::ScmResultCode;
use thiserror::Error;

/// Failures raised inside the Storage Container Manager.
#[derive(Debug, Error)]
pub enum ScmError {
    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Container already exists: {0}")]
    ContainerExists(String),

    #[error("Insufficient healthy nodes: needed {needed}, available {available}")]
    InsufficientNodes { needed: usize, available: usize },

    #[error("Invalid block size: {0}")]
    InvalidBlockSize(u64),

    #[error("Invalid registration: {0}")]
    InvalidRegistration(String),

    #[error("Unknown placement policy: {0}")]
    UnknownPlacementPolicy(String),

    #[error("Metadata store failure: {0}")]
    Store(#[from] MetaStoreError),

    #[error("Record encoding failure: {0}")]
    Record(#[from] serde_json::Error),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

impl ScmError {
    /// Wire code for the client protocol's response envelope.
    pub fn result_code(&self) -> ScmResultCode {
        match self {
            ScmError::ContainerNotFound(_) => ScmResultCode::ContainerNotFound,
            ScmError::ContainerExists(_) => ScmResultCode::ContainerExists,
            ScmError::InsufficientNodes { .. } => ScmResultCode::InsufficientNodes,
            ScmError::InvalidBlockSize(_) => ScmResultCode::InvalidBlockSize,
            ScmError::InvalidRegistration(_) => ScmResultCode::InvalidRequest,
            ScmError::UnknownPlacementPolicy(_) => ScmResultCode::InvalidRequest,
            ScmError::Store(_) | ScmError::Record(_) | ScmError::Bind { .. } => {
                ScmResultCode::UnknownFailure
            }
        }
    }
}
