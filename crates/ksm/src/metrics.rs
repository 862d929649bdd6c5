use std::sync::atomic::{AtomicU64, Ordering};

/// KSM per-operation counters, passed in at construction.
///
/// Failure counters count failures; success counters count successes.
#[derive(Debug, Default)]
pub struct KsmMetrics {
    pub volume_creates: AtomicU64,
    pub volume_create_fails: AtomicU64,
    pub volume_updates: AtomicU64,
    pub volume_update_fails: AtomicU64,
    pub volume_deletes: AtomicU64,
    pub volume_delete_fails: AtomicU64,
    pub bucket_creates: AtomicU64,
    pub bucket_create_fails: AtomicU64,
    pub bucket_updates: AtomicU64,
    pub bucket_update_fails: AtomicU64,
    pub bucket_deletes: AtomicU64,
    pub bucket_delete_fails: AtomicU64,
    pub key_allocates: AtomicU64,
    pub key_allocate_fails: AtomicU64,
    pub key_lookups: AtomicU64,
    pub key_lookup_fails: AtomicU64,
    pub key_deletes: AtomicU64,
    pub key_delete_fails: AtomicU64,
}

impl KsmMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bump the success or failure counter matching `result`.
    pub fn record<T, E>(
        &self,
        result: &Result<T, E>,
        success: &AtomicU64,
        failure: &AtomicU64,
    ) {
        match result {
            Ok(_) => success.fetch_add(1, Ordering::Relaxed),
            Err(_) => failure.fetch_add(1, Ordering::Relaxed),
        };
    }
}
