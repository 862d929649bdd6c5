//! Bucket CRUD nested under volumes.

use std::sync::Arc;

use common::{keys, unix_timestamp, BucketArgs, BucketInfo};
use meta_store::MetaStore;
use tracing::info;

use crate::error::KsmError;
use crate::metrics::KsmMetrics;

type Result<T> = std::result::Result<T, KsmError>;

pub struct BucketManager {
    store: MetaStore,
    metrics: Arc<KsmMetrics>,
}

impl BucketManager {
    pub fn new(store: MetaStore, metrics: Arc<KsmMetrics>) -> Self {
        Self { store, metrics }
    }

    pub fn create_bucket(&self, info: BucketInfo) -> Result<BucketInfo> {
        let result = self.do_create_bucket(info);
        self.metrics.record(
            &result,
            &self.metrics.bucket_creates,
            &self.metrics.bucket_create_fails,
        );
        result
    }

    fn do_create_bucket(&self, mut info: BucketInfo) -> Result<BucketInfo> {
        let _guard = self.store.write_lock();

        if self.store.get(&keys::volume_key(&info.volume))?.is_none() {
            return Err(KsmError::VolumeNotFound(info.volume));
        }
        let bucket_key = keys::bucket_key(&info.volume, &info.bucket);
        if self.store.get(&bucket_key)?.is_some() {
            return Err(KsmError::BucketAlreadyExists {
                volume: info.volume,
                bucket: info.bucket,
            });
        }

        info.created_on = unix_timestamp();
        self.store.put(&bucket_key, &serde_json::to_vec(&info)?)?;
        info!(volume = %info.volume, bucket = %info.bucket, "bucket created");
        Ok(info)
    }

    /// Merge ACL additions/removals and property changes into the record.
    pub fn set_bucket_property(&self, args: BucketArgs) -> Result<BucketInfo> {
        let result = self.do_set_bucket_property(args);
        self.metrics.record(
            &result,
            &self.metrics.bucket_updates,
            &self.metrics.bucket_update_fails,
        );
        result
    }

    fn do_set_bucket_property(&self, args: BucketArgs) -> Result<BucketInfo> {
        let _guard = self.store.write_lock();

        let mut info = self.load_bucket(&args.volume, &args.bucket)?;
        info.acls.retain(|acl| !args.remove_acls.contains(acl));
        for acl in args.add_acls {
            if !info.acls.contains(&acl) {
                info.acls.push(acl);
            }
        }
        if let Some(versioning) = args.versioning {
            info.versioning = versioning;
        }
        if let Some(storage_type) = args.storage_type {
            info.storage_type = storage_type;
        }

        self.store.put(
            &keys::bucket_key(&args.volume, &args.bucket),
            &serde_json::to_vec(&info)?,
        )?;
        Ok(info)
    }

    pub fn get_bucket_info(&self, volume: &str, bucket: &str) -> Result<BucketInfo> {
        let _guard = self.store.read_lock();
        self.load_bucket(volume, bucket)
    }

    /// Remove a bucket with no keys under it.
    pub fn delete_bucket(&self, volume: &str, bucket: &str) -> Result<()> {
        let result = self.do_delete_bucket(volume, bucket);
        self.metrics.record(
            &result,
            &self.metrics.bucket_deletes,
            &self.metrics.bucket_delete_fails,
        );
        result
    }

    fn do_delete_bucket(&self, volume: &str, bucket: &str) -> Result<()> {
        let _guard = self.store.write_lock();

        let bucket_key = keys::bucket_key(volume, bucket);
        if self.store.get(&bucket_key)?.is_none() {
            return Err(KsmError::BucketNotFound {
                volume: volume.to_string(),
                bucket: bucket.to_string(),
            });
        }
        let subtree = keys::bucket_prefix(volume, bucket);
        if !self.store.iter(Some(&subtree[..])).is_empty() {
            return Err(KsmError::BucketNotEmpty {
                volume: volume.to_string(),
                bucket: bucket.to_string(),
            });
        }
        self.store.delete(&bucket_key)?;
        info!(volume, bucket, "bucket deleted");
        Ok(())
    }

    fn load_bucket(&self, volume: &str, bucket: &str) -> Result<BucketInfo> {
        match self.store.get(&keys::bucket_key(volume, bucket))? {
            Some(raw) => Ok(serde_json::from_slice(&raw)?),
            None => Err(KsmError::BucketNotFound {
                volume: volume.to_string(),
                bucket: bucket.to_string(),
            }),
        }
    }
}
