use std::sync::atomic::AtomicU64;

/// SCM counters. Constructed once and handed to each manager explicitly;
/// there is no process-wide metrics registry.
#[derive(Debug, Default)]
pub struct ScmMetrics {
    pub registrations: AtomicU64,
    pub heartbeats: AtomicU64,
    pub containers_allocated: AtomicU64,
    pub containers_deleted: AtomicU64,
    pub blocks_allocated: AtomicU64,
    pub blocks_deleted: AtomicU64,
    pub allocation_failures: AtomicU64,
    pub deletion_txs_committed: AtomicU64,
    pub deletion_txs_dropped: AtomicU64,
}

impl ScmMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}
