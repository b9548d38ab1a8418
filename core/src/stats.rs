//! Per-domain diagnostic counters.

use core::sync::atomic::{AtomicU64, Ordering};

/// Live per-domain counters, updated with relaxed atomics on hot paths.
#[derive(Debug, Default)]
pub(crate) struct DomainCounters {
    pub callbacks_enqueued: AtomicU64,
    pub callbacks_invoked: AtomicU64,
    pub overload_raises: AtomicU64,
    pub remote_drains: AtomicU64,
    pub records_migrated: AtomicU64,
}

impl DomainCounters {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn add(counter: &AtomicU64, delta: u64) {
        counter.fetch_add(delta, Ordering::Relaxed);
    }
}

/// Point-in-time snapshot of one domain's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DomainStats {
    /// Batches started since engine construction.
    pub batches_started: u64,
    /// Batches completed since engine construction.
    pub batches_completed: u64,
    /// Callbacks accepted by `enqueue`.
    pub callbacks_enqueued: u64,
    /// Callbacks invoked (locally, remotely, or inline during offline).
    pub callbacks_invoked: u64,
    /// Times the overload signal was raised.
    pub overload_raises: u64,
    /// Remote-offload drain passes that detached at least one record.
    pub remote_drains: u64,
    /// Records migrated to a survivor by `cpu_offline`.
    pub records_migrated: u64,
}

impl DomainCounters {
    pub(crate) fn snapshot(&self, batches_started: u64, batches_completed: u64) -> DomainStats {
        DomainStats {
            batches_started,
            batches_completed,
            callbacks_enqueued: self.callbacks_enqueued.load(Ordering::Relaxed),
            callbacks_invoked: self.callbacks_invoked.load(Ordering::Relaxed),
            overload_raises: self.overload_raises.load(Ordering::Relaxed),
            remote_drains: self.remote_drains.load(Ordering::Relaxed),
            records_migrated: self.records_migrated.load(Ordering::Relaxed),
        }
    }
}
