//! RPC handler translating the KSM protocol onto the namespace managers.

use std::sync::Arc;

use async_trait::async_trait;
use protocol::ksm::{KsmRequest, KsmResponse};
use protocol::server::RpcHandler;
use tracing::{debug, error};

use crate::error::KsmError;
use crate::KeySpaceManager;

pub struct KsmHandler {
    ksm: Arc<KeySpaceManager>,
}

impl KsmHandler {
    pub fn new(ksm: Arc<KeySpaceManager>) -> Self {
        Self { ksm }
    }
}

fn error_response(operation: &'static str, e: KsmError) -> KsmResponse {
    if e.is_internal() {
        // Enough context to identify the failing operation; never retried
        // here.
        error!(operation, error = %e, "KSM internal failure");
    } else {
        debug!(operation, error = %e, "request rejected");
    }
    KsmResponse::Error {
        status: e.status(),
        message: e.to_string(),
    }
}

#[async_trait]
impl RpcHandler for KsmHandler {
    type Request = KsmRequest;
    type Response = KsmResponse;

    async fn handle(&self, request: KsmRequest) -> KsmResponse {
        match request {
            KsmRequest::CreateVolume { args } => self
                .ksm
                .volumes()
                .create_volume(args)
                .map(|info| KsmResponse::Volume { info })
                .unwrap_or_else(|e| error_response("createVolume", e)),
            KsmRequest::SetVolumeOwner { volume, owner } => self
                .ksm
                .volumes()
                .set_owner(&volume, &owner)
                .map(|info| KsmResponse::Volume { info })
                .unwrap_or_else(|e| error_response("setVolumeOwner", e)),
            KsmRequest::SetVolumeQuota {
                volume,
                quota_bytes,
            } => self
                .ksm
                .volumes()
                .set_quota(&volume, quota_bytes)
                .map(|info| KsmResponse::Volume { info })
                .unwrap_or_else(|e| error_response("setVolumeQuota", e)),
            KsmRequest::DeleteVolume { volume } => self
                .ksm
                .volumes()
                .delete_volume(&volume)
                .map(|_| KsmResponse::Done)
                .unwrap_or_else(|e| error_response("deleteVolume", e)),
            KsmRequest::GetVolumeInfo { volume } => self
                .ksm
                .volumes()
                .get_volume_info(&volume)
                .map(|info| KsmResponse::Volume { info })
                .unwrap_or_else(|e| error_response("getVolumeInfo", e)),
            KsmRequest::ListVolumesByUser { user } => self
                .ksm
                .volumes()
                .list_volumes_by_user(&user)
                .map(|volumes| KsmResponse::VolumeList { volumes })
                .unwrap_or_else(|e| error_response("listVolumesByUser", e)),
            KsmRequest::CreateBucket { info } => self
                .ksm
                .buckets()
                .create_bucket(info)
                .map(|info| KsmResponse::Bucket { info })
                .unwrap_or_else(|e| error_response("createBucket", e)),
            KsmRequest::SetBucketProperty { args } => self
                .ksm
                .buckets()
                .set_bucket_property(args)
                .map(|info| KsmResponse::Bucket { info })
                .unwrap_or_else(|e| error_response("setBucketProperty", e)),
            KsmRequest::GetBucketInfo { volume, bucket } => self
                .ksm
                .buckets()
                .get_bucket_info(&volume, &bucket)
                .map(|info| KsmResponse::Bucket { info })
                .unwrap_or_else(|e| error_response("getBucketInfo", e)),
            KsmRequest::DeleteBucket { volume, bucket } => self
                .ksm
                .buckets()
                .delete_bucket(&volume, &bucket)
                .map(|_| KsmResponse::Done)
                .unwrap_or_else(|e| error_response("deleteBucket", e)),
            KsmRequest::AllocateKey { args } => self
                .ksm
                .keys()
                .allocate_key(args)
                .await
                .map(|info| KsmResponse::Key { info })
                .unwrap_or_else(|e| error_response("allocateKey", e)),
            KsmRequest::LookupKey { args } => self
                .ksm
                .keys()
                .lookup_key(&args)
                .map(|info| KsmResponse::Key { info })
                .unwrap_or_else(|e| error_response("lookupKey", e)),
            KsmRequest::DeleteKey { args } => self
                .ksm
                .keys()
                .delete_key(&args)
                .await
                .map(|_| KsmResponse::Done)
                .unwrap_or_else(|e| error_response("deleteKey", e)),
            KsmRequest::ListKeys {
                volume,
                bucket,
                prefix,
            } => self
                .ksm
                .keys()
                .list_keys(&volume, &bucket, prefix.as_deref())
                .map(|keys| KsmResponse::KeyList { keys })
                .unwrap_or_else(|e| error_response("listKeys", e)),
        }
    }
}
