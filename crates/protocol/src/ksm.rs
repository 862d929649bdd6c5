//! KeySpaceManagerProtocol: client↔KSM messages.

use common::{BucketArgs, BucketInfo, KeyArgs, KeyInfo, VolumeArgs, VolumeInfo};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::ProtocolError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KsmRequest {
    CreateVolume { args: VolumeArgs },
    SetVolumeOwner { volume: String, owner: String },
    SetVolumeQuota { volume: String, quota_bytes: u64 },
    DeleteVolume { volume: String },
    GetVolumeInfo { volume: String },
    ListVolumesByUser { user: String },
    CreateBucket { info: BucketInfo },
    SetBucketProperty { args: BucketArgs },
    GetBucketInfo { volume: String, bucket: String },
    DeleteBucket { volume: String, bucket: String },
    AllocateKey { args: KeyArgs },
    LookupKey { args: KeyArgs },
    DeleteKey { args: KeyArgs },
    ListKeys {
        volume: String,
        bucket: String,
        prefix: Option<String>,
    },
}

/// Wire status for every KSM response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KsmStatus {
    Ok,
    VolumeAlreadyExists,
    VolumeNotFound,
    VolumeNotEmpty,
    UserTooManyVolumes,
    UserNotFound,
    QuotaBelowUsage,
    BucketAlreadyExists,
    BucketNotFound,
    BucketNotEmpty,
    KeyAlreadyExists,
    KeyNotFound,
    AccessDenied,
    InternalError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KsmResponse {
    Error { status: KsmStatus, message: String },
    Done,
    Volume { info: VolumeInfo },
    VolumeList { volumes: Vec<String> },
    Bucket { info: BucketInfo },
    Key { info: KeyInfo },
    KeyList { keys: Vec<KeyInfo> },
}

/// Failure surfaced by the typed KSM client.
#[derive(Debug, Error)]
pub enum KsmCallError {
    #[error("transport failure: {0}")]
    Transport(#[from] ProtocolError),

    #[error("KSM returned {status:?}: {message}")]
    Remote { status: KsmStatus, message: String },

    #[error("unexpected KSM response: {0}")]
    Unexpected(String),
}

impl KsmCallError {
    /// Remote status if the failure was a typed KSM rejection.
    pub fn status(&self) -> Option<KsmStatus> {
        match self {
            KsmCallError::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }
}
