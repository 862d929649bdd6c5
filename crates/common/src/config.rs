use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default chunk size for the client write path.
pub const CHUNK_SIZE_DEFAULT: usize = 16 * 1024 * 1024;

/// Hard upper bound on the chunk size; larger configured values are clamped.
pub const CHUNK_MAX_SIZE: usize = 32 * 1024 * 1024;

/// Cluster-wide configuration shared by every component.
///
/// Every field has a default; a JSON config file overrides defaults and the
/// `OZONE_*` environment variables override the addresses on top of that.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OzoneConfig {
    /// SCM client RPC endpoint.
    pub scm_address: String,
    /// SCM endpoint serving datanode registration and heartbeats.
    pub scm_datanode_address: String,
    /// KSM client RPC endpoint.
    pub ksm_address: String,
    /// Local data-plane listen address for a datanode.
    pub datanode_address: String,
    /// Concurrent in-flight handler cap for the KSM server.
    pub ksm_handler_count: usize,
    /// Concurrent in-flight handler cap for both SCM servers.
    pub scm_handler_count: usize,
    pub chunk_size: usize,
    /// Payloads at or below this size use the single-RPC small-file path.
    pub small_file_threshold: usize,
    pub container_size_bytes: u64,
    /// Placement policy name: "random" or "capacity".
    pub container_placement: String,
    pub block_deletion_max_retry: u32,
    pub heartbeat_interval_ms: u64,
    pub stale_node_interval_ms: u64,
    pub dead_node_interval_ms: u64,
    pub node_sweep_interval_ms: u64,
    /// Consecutive missed heartbeats before an endpoint falls back to
    /// re-registration.
    pub endpoint_miss_limit: u32,
    pub rpc_timeout_ms: u64,
    pub max_user_volumes: usize,
    /// Grace window before an unreferenced data-plane client is closed.
    pub client_idle_ms: u64,
}

impl Default for OzoneConfig {
    fn default() -> Self {
        Self {
            scm_address: "127.0.0.1:9860".to_string(),
            scm_datanode_address: "127.0.0.1:9861".to_string(),
            ksm_address: "127.0.0.1:9862".to_string(),
            datanode_address: "127.0.0.1:9863".to_string(),
            ksm_handler_count: 20,
            scm_handler_count: 10,
            chunk_size: CHUNK_SIZE_DEFAULT,
            small_file_threshold: 1024 * 1024,
            container_size_bytes: 1024 * 1024 * 1024,
            container_placement: "random".to_string(),
            block_deletion_max_retry: 4096,
            heartbeat_interval_ms: 30_000,
            stale_node_interval_ms: 90_000,
            dead_node_interval_ms: 300_000,
            node_sweep_interval_ms: 5_000,
            endpoint_miss_limit: 3,
            rpc_timeout_ms: 15_000,
            max_user_volumes: 1024,
            client_idle_ms: 10_000,
        }
    }
}

impl OzoneConfig {
    /// Load configuration from a JSON file, then apply environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&data)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config.apply_env())
    }

    /// Defaults plus environment overrides; used when no config file is given.
    pub fn from_env() -> Self {
        Self::default().apply_env()
    }

    fn apply_env(mut self) -> Self {
        if let Ok(addr) = std::env::var("OZONE_SCM_ADDRESS") {
            self.scm_address = addr;
        }
        if let Ok(addr) = std::env::var("OZONE_SCM_DATANODE_ADDRESS") {
            self.scm_datanode_address = addr;
        }
        if let Ok(addr) = std::env::var("OZONE_KSM_ADDRESS") {
            self.ksm_address = addr;
        }
        self
    }

    /// Configured chunk size clamped to the hard maximum.
    pub fn effective_chunk_size(&self) -> usize {
        self.chunk_size.min(CHUNK_MAX_SIZE).max(1)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn stale_node_interval(&self) -> Duration {
        Duration::from_millis(self.stale_node_interval_ms)
    }

    pub fn dead_node_interval(&self) -> Duration {
        Duration::from_millis(self.dead_node_interval_ms)
    }

    pub fn node_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.node_sweep_interval_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn client_idle(&self) -> Duration {
        Duration::from_millis(self.client_idle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_intervals() {
        let config = OzoneConfig::default();
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.stale_node_interval(), Duration::from_secs(90));
        assert_eq!(config.dead_node_interval(), Duration::from_secs(300));
        assert_eq!(config.effective_chunk_size(), CHUNK_SIZE_DEFAULT);
    }

    #[test]
    fn chunk_size_is_clamped_to_hard_max() {
        let config = OzoneConfig {
            chunk_size: CHUNK_MAX_SIZE * 4,
            ..Default::default()
        };
        assert_eq!(config.effective_chunk_size(), CHUNK_MAX_SIZE);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: OzoneConfig =
            serde_json::from_str(r#"{"ksm_handler_count": 4}"#).unwrap();
        assert_eq!(config.ksm_handler_count, 4);
        assert_eq!(config.chunk_size, CHUNK_SIZE_DEFAULT);
    }
}
