//! Volume CRUD and the user→volumes index.
//!
//! The user index and volume records are always mutated in one atomic batch
//! so a crash cannot leave them disagreeing.

use std::sync::Arc;

use common::{keys, unix_timestamp, KeyInfo, VolumeArgs, VolumeInfo, MAX_QUOTA_BYTES};
use meta_store::{MetaStore, StoreOp};
use tracing::info;

use crate::error::KsmError;
use crate::metrics::KsmMetrics;

type Result<T> = std::result::Result<T, KsmError>;

pub struct VolumeManager {
    store: MetaStore,
    max_user_volumes: usize,
    metrics: Arc<KsmMetrics>,
}

impl VolumeManager {
    pub fn new(store: MetaStore, max_user_volumes: usize, metrics: Arc<KsmMetrics>) -> Self {
        Self {
            store,
            max_user_volumes,
            metrics,
        }
    }

    pub fn create_volume(&self, args: VolumeArgs) -> Result<VolumeInfo> {
        let result = self.do_create_volume(args);
        self.metrics.record(
            &result,
            &self.metrics.volume_creates,
            &self.metrics.volume_create_fails,
        );
        result
    }

    fn do_create_volume(&self, args: VolumeArgs) -> Result<VolumeInfo> {
        let _guard = self.store.write_lock();

        let volume_key = keys::volume_key(&args.volume);
        if self.store.get(&volume_key)?.is_some() {
            return Err(KsmError::VolumeAlreadyExists(args.volume));
        }

        let mut owned = self.load_user_volumes(&args.owner)?.unwrap_or_default();
        if owned.len() >= self.max_user_volumes {
            return Err(KsmError::UserTooManyVolumes {
                user: args.owner,
                limit: self.max_user_volumes,
            });
        }
        owned.push(args.volume.clone());
        owned.sort();

        let info = VolumeInfo {
            volume: args.volume.clone(),
            owner: args.owner.clone(),
            admin: args.admin,
            quota_bytes: args.quota_bytes.unwrap_or(MAX_QUOTA_BYTES),
            created_on: unix_timestamp(),
            acls: args.acls,
        };
        self.store.batch(vec![
            StoreOp::Put {
                key: volume_key,
                value: serde_json::to_vec(&info)?,
            },
            StoreOp::Put {
                key: keys::user_key(&args.owner),
                value: serde_json::to_vec(&owned)?,
            },
        ])?;

        info!(volume = %info.volume, owner = %info.owner, "volume created");
        Ok(info)
    }

    /// Rewrite the owner, moving the volume between both user indices in one
    /// batch.
    pub fn set_owner(&self, volume: &str, new_owner: &str) -> Result<VolumeInfo> {
        let result = self.do_set_owner(volume, new_owner);
        self.metrics.record(
            &result,
            &self.metrics.volume_updates,
            &self.metrics.volume_update_fails,
        );
        result
    }

    fn do_set_owner(&self, volume: &str, new_owner: &str) -> Result<VolumeInfo> {
        let _guard = self.store.write_lock();

        let mut info = self.load_volume(volume)?;
        if info.owner == new_owner {
            return Ok(info);
        }
        let old_owner = std::mem::replace(&mut info.owner, new_owner.to_string());

        let mut old_list = self.load_user_volumes(&old_owner)?.unwrap_or_default();
        old_list.retain(|v| v != volume);
        let mut new_list = self.load_user_volumes(new_owner)?.unwrap_or_default();
        if new_list.len() >= self.max_user_volumes {
            return Err(KsmError::UserTooManyVolumes {
                user: new_owner.to_string(),
                limit: self.max_user_volumes,
            });
        }
        new_list.push(volume.to_string());
        new_list.sort();

        let mut ops = vec![
            StoreOp::Put {
                key: keys::volume_key(volume),
                value: serde_json::to_vec(&info)?,
            },
            StoreOp::Put {
                key: keys::user_key(new_owner),
                value: serde_json::to_vec(&new_list)?,
            },
        ];
        if old_list.is_empty() {
            ops.push(StoreOp::Delete {
                key: keys::user_key(&old_owner),
            });
        } else {
            ops.push(StoreOp::Put {
                key: keys::user_key(&old_owner),
                value: serde_json::to_vec(&old_list)?,
            });
        }
        self.store.batch(ops)?;

        info!(volume, from = %old_owner, to = %new_owner, "volume owner changed");
        Ok(info)
    }

    pub fn set_quota(&self, volume: &str, quota_bytes: u64) -> Result<VolumeInfo> {
        let result = self.do_set_quota(volume, quota_bytes);
        self.metrics.record(
            &result,
            &self.metrics.volume_updates,
            &self.metrics.volume_update_fails,
        );
        result
    }

    fn do_set_quota(&self, volume: &str, quota_bytes: u64) -> Result<VolumeInfo> {
        let _guard = self.store.write_lock();
        let mut info = self.load_volume(volume)?;
        let used = self.volume_used_bytes(volume);
        if quota_bytes < used {
            return Err(KsmError::QuotaBelowUsage {
                volume: volume.to_string(),
                quota: quota_bytes,
                used,
            });
        }
        info.quota_bytes = quota_bytes;
        self.store
            .put(&keys::volume_key(volume), &serde_json::to_vec(&info)?)?;
        Ok(info)
    }

    /// Bytes reserved by the keys under a volume. Bucket records carry two
    /// `/` separators, key records three or more; only keys count.
    fn volume_used_bytes(&self, volume: &str) -> u64 {
        let prefix = keys::volume_prefix(volume);
        let mut used = 0u64;
        for (key, raw) in self.store.iter(Some(&prefix[..])) {
            if key.iter().filter(|b| **b == b'/').count() < 3 {
                continue;
            }
            if let Ok(info) = serde_json::from_slice::<KeyInfo>(&raw) {
                used = used.saturating_add(info.data_size);
            }
        }
        used
    }

    /// Remove an empty volume and its user-index entry atomically.
    pub fn delete_volume(&self, volume: &str) -> Result<()> {
        let result = self.do_delete_volume(volume);
        self.metrics.record(
            &result,
            &self.metrics.volume_deletes,
            &self.metrics.volume_delete_fails,
        );
        result
    }

    fn do_delete_volume(&self, volume: &str) -> Result<()> {
        let _guard = self.store.write_lock();

        let info = self.load_volume(volume)?;
        let subtree = keys::volume_prefix(volume);
        if !self.store.iter(Some(&subtree[..])).is_empty() {
            return Err(KsmError::VolumeNotEmpty(volume.to_string()));
        }

        let mut owned = self.load_user_volumes(&info.owner)?.unwrap_or_default();
        owned.retain(|v| v != volume);

        let mut ops = vec![StoreOp::Delete {
            key: keys::volume_key(volume),
        }];
        if owned.is_empty() {
            ops.push(StoreOp::Delete {
                key: keys::user_key(&info.owner),
            });
        } else {
            ops.push(StoreOp::Put {
                key: keys::user_key(&info.owner),
                value: serde_json::to_vec(&owned)?,
            });
        }
        self.store.batch(ops)?;

        info!(volume, owner = %info.owner, "volume deleted");
        Ok(())
    }

    pub fn get_volume_info(&self, volume: &str) -> Result<VolumeInfo> {
        let _guard = self.store.read_lock();
        self.load_volume(volume)
    }

    /// Sorted volume names owned by `user`.
    pub fn list_volumes_by_user(&self, user: &str) -> Result<Vec<String>> {
        let _guard = self.store.read_lock();
        self.load_user_volumes(user)?
            .ok_or_else(|| KsmError::UserNotFound(user.to_string()))
    }

    fn load_volume(&self, volume: &str) -> Result<VolumeInfo> {
        match self.store.get(&keys::volume_key(volume))? {
            Some(raw) => Ok(serde_json::from_slice(&raw)?),
            None => Err(KsmError::VolumeNotFound(volume.to_string())),
        }
    }

    fn load_user_volumes(&self, user: &str) -> Result<Option<Vec<String>>> {
        match self.store.get(&keys::user_key(user))? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }
}
