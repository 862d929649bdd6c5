use meta_store::MetaStoreError;
use protocol::ksm::KsmStatus;
use thiserror::Error;

/// Failures raised inside the Key-Space Manager.
#[derive(Debug, Error)]
pub enum KsmError {
    #[error("Volume already exists: {0}")]
    VolumeAlreadyExists(String),

    #[error("Volume not found: {0}")]
    VolumeNotFound(String),

    #[error("Volume not empty: {0}")]
    VolumeNotEmpty(String),

    #[error("User {user} has reached the limit of {limit} volumes")]
    UserTooManyVolumes { user: String, limit: usize },

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Quota of {quota} bytes for volume {volume} is below the {used} bytes in use")]
    QuotaBelowUsage {
        volume: String,
        quota: u64,
        used: u64,
    },

    #[error("Bucket already exists: {volume}/{bucket}")]
    BucketAlreadyExists { volume: String, bucket: String },

    #[error("Bucket not found: {volume}/{bucket}")]
    BucketNotFound { volume: String, bucket: String },

    #[error("Bucket not empty: {volume}/{bucket}")]
    BucketNotEmpty { volume: String, bucket: String },

    #[error("Key already exists: {0}")]
    KeyAlreadyExists(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Block allocation failed: {0}")]
    Allocation(String),

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

impl KsmError {
    /// Wire status for the response envelope.
    pub fn status(&self) -> KsmStatus {
        match self {
            KsmError::VolumeAlreadyExists(_) => KsmStatus::VolumeAlreadyExists,
            KsmError::VolumeNotFound(_) => KsmStatus::VolumeNotFound,
            KsmError::VolumeNotEmpty(_) => KsmStatus::VolumeNotEmpty,
            KsmError::UserTooManyVolumes { .. } => KsmStatus::UserTooManyVolumes,
            KsmError::UserNotFound(_) => KsmStatus::UserNotFound,
            KsmError::QuotaBelowUsage { .. } => KsmStatus::QuotaBelowUsage,
            KsmError::BucketAlreadyExists { .. } => KsmStatus::BucketAlreadyExists,
            KsmError::BucketNotFound { .. } => KsmStatus::BucketNotFound,
            KsmError::BucketNotEmpty { .. } => KsmStatus::BucketNotEmpty,
            KsmError::KeyAlreadyExists(_) => KsmStatus::KeyAlreadyExists,
            KsmError::KeyNotFound(_) => KsmStatus::KeyNotFound,
            KsmError::AccessDenied(_) => KsmStatus::AccessDenied,
            KsmError::Allocation(_)
            | KsmError::Store(_)
            | KsmError::Record(_)
            | KsmError::Bind { .. } => KsmStatus::InternalError,
        }
    }

    /// True for failures worth an ERROR-level log line; precondition
    /// rejections are not.
    pub fn is_internal(&self) -> bool {
        self.status() == KsmStatus::InternalError
    }
}
