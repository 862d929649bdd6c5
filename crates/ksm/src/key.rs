//! Key metadata: namespace checks here, block grants from SCM.

use std::sync::Arc;

use common::{keys, unix_timestamp, KeyArgs, KeyInfo};
use meta_store::MetaStore;
use tracing::{debug, warn};

use crate::error::KsmError;
use crate::metrics::KsmMetrics;
use crate::BlockAllocator;

type Result<T> = std::result::Result<T, KsmError>;

pub struct KeyManager {
    store: MetaStore,
    allocator: Arc<dyn BlockAllocator>,
    metrics: Arc<KsmMetrics>,
}

impl KeyManager {
    pub fn new(
        store: MetaStore,
        allocator: Arc<dyn BlockAllocator>,
        metrics: Arc<KsmMetrics>,
    ) -> Self {
        Self {
            store,
            allocator,
            metrics,
        }
    }

    /// Reserve a key: verify the namespace, obtain a block from SCM, persist
    /// the key record. The store lock is never held across the SCM call; the
    /// namespace is re-verified before the write, and a lost race (or a
    /// failed write) triggers compensating block deletion so no orphan block
    /// survives a failed create.
    pub async fn allocate_key(&self, args: KeyArgs) -> Result<KeyInfo> {
        let result = self.do_allocate_key(args).await;
        self.metrics.record(
            &result,
            &self.metrics.key_allocates,
            &self.metrics.key_allocate_fails,
        );
        result
    }

    async fn do_allocate_key(&self, args: KeyArgs) -> Result<KeyInfo> {
        {
            let _guard = self.store.write_lock();
            self.check_namespace(&args)?;
        }

        let block = self
            .allocator
            .allocate_block(args.data_size)
            .await
            .map_err(|e| KsmError::Allocation(e.to_string()))?;

        let info = KeyInfo {
            volume: args.volume.clone(),
            bucket: args.bucket.clone(),
            key: args.key.clone(),
            data_size: args.data_size,
            block_key: block.block_key.clone(),
            container_name: block.pipeline.container_name.clone(),
            should_create_container: block.create_container,
            created_on: unix_timestamp(),
        };

        let write_result: Result<()> = {
            let _guard = self.store.write_lock();
            match self.check_namespace(&args) {
                Ok(()) => self
                    .store
                    .put(
                        &keys::object_key(&args.volume, &args.bucket, &args.key),
                        &serde_json::to_vec(&info)?,
                    )
                    .map_err(KsmError::from),
                Err(e) => Err(e),
            }
        };

        if let Err(e) = write_result {
            if let Err(cleanup) = self
                .allocator
                .delete_blocks(vec![block.block_key.clone()])
                .await
            {
                warn!(
                    block = %block.block_key,
                    error = %cleanup,
                    "failed to reclaim block after aborted key create"
                );
            }
            return Err(e);
        }

        debug!(
            volume = %info.volume,
            bucket = %info.bucket,
            key = %info.key,
            block = %info.block_key,
            "key allocated"
        );
        Ok(info)
    }

    pub fn lookup_key(&self, args: &KeyArgs) -> Result<KeyInfo> {
        let result = self.do_lookup_key(args);
        self.metrics.record(
            &result,
            &self.metrics.key_lookups,
            &self.metrics.key_lookup_fails,
        );
        result
    }

    fn do_lookup_key(&self, args: &KeyArgs) -> Result<KeyInfo> {
        let _guard = self.store.read_lock();
        match self
            .store
            .get(&keys::object_key(&args.volume, &args.bucket, &args.key))?
        {
            Some(raw) => Ok(serde_json::from_slice(&raw)?),
            None => Err(KsmError::KeyNotFound(args.key.clone())),
        }
    }

    /// Drop the key record, then reclaim its block from SCM best-effort.
    pub async fn delete_key(&self, args: &KeyArgs) -> Result<()> {
        let result = self.do_delete_key(args).await;
        self.metrics.record(
            &result,
            &self.metrics.key_deletes,
            &self.metrics.key_delete_fails,
        );
        result
    }

    async fn do_delete_key(&self, args: &KeyArgs) -> Result<()> {
        let info = {
            let _guard = self.store.write_lock();
            let object_key = keys::object_key(&args.volume, &args.bucket, &args.key);
            let info: KeyInfo = match self.store.get(&object_key)? {
                Some(raw) => serde_json::from_slice(&raw)?,
                None => return Err(KsmError::KeyNotFound(args.key.clone())),
            };
            self.store.delete(&object_key)?;
            info
        };

        if let Err(e) = self
            .allocator
            .delete_blocks(vec![info.block_key.clone()])
            .await
        {
            // Namespace is consistent; only the block reclaim is lost.
            warn!(block = %info.block_key, error = %e, "block reclaim failed");
        }
        Ok(())
    }

    /// Keys of a bucket in lexicographic order, optionally narrowed by a key
    /// name prefix.
    pub fn list_keys(
        &self,
        volume: &str,
        bucket: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<KeyInfo>> {
        let _guard = self.store.read_lock();

        if self.store.get(&keys::bucket_key(volume, bucket))?.is_none() {
            return Err(KsmError::BucketNotFound {
                volume: volume.to_string(),
                bucket: bucket.to_string(),
            });
        }

        let scan_prefix = match prefix {
            Some(p) => {
                let mut scan = keys::bucket_prefix(volume, bucket);
                scan.extend_from_slice(p.as_bytes());
                scan
            }
            None => keys::bucket_prefix(volume, bucket),
        };
        let mut found = Vec::new();
        for (_, raw) in self.store.iter(Some(&scan_prefix[..])) {
            found.push(serde_json::from_slice(&raw)?);
        }
        Ok(found)
    }

    fn check_namespace(&self, args: &KeyArgs) -> Result<()> {
        if self.store.get(&keys::volume_key(&args.volume))?.is_none() {
            return Err(KsmError::VolumeNotFound(args.volume.clone()));
        }
        if self
            .store
            .get(&keys::bucket_key(&args.volume, &args.bucket))?
            .is_none()
        {
            return Err(KsmError::BucketNotFound {
                volume: args.volume.clone(),
                bucket: args.bucket.clone(),
            });
        }
        if self
            .store
            .get(&keys::object_key(&args.volume, &args.bucket, &args.key))?
            .is_some()
        {
            return Err(KsmError::KeyAlreadyExists(args.key.clone()));
        }
        Ok(())
    }
}
