//! Grace-period controller.
//!
//! One `GraceControl` exists per domain. It tracks the current and completed
//! batch numbers (lock-free reads) and, under its lock, the set of
//! processors that still owe a quiescent state for the active batch.
//!
//! Grace-period handling is a two-step protocol:
//! - a new batch is started by [`GraceControl::request_batch`]; the start is
//!   not broadcast, processors notice it by comparing their `seen_batch`
//!   against [`GraceControl::current_batch`];
//! - every seeded processor must then pass a quiescent state and report it,
//!   which shrinks the pending set until empty, completing the batch and
//!   starting the next one if a request is queued.

use core::sync::atomic::{fence, AtomicI64, Ordering};

use spin::Mutex;

use crate::cpumask::CpuSet;

/// Initial batch number. Deliberately negative so that wraparound-safe
/// comparison is exercised from the first batch onward.
pub(crate) const BATCH_SEED: i64 = -300;

/// Is batch `a` strictly before batch `b`, under wrapping arithmetic?
#[inline]
pub(crate) fn batch_before(a: i64, b: i64) -> bool {
    a.wrapping_sub(b) < 0
}

struct CtrlInner {
    /// Processors that still owe a quiescent state for the active batch.
    /// Meaningful only while a batch is active; monotonically shrinks.
    pending: CpuSet,
    /// A follow-up batch has been requested while the current one runs.
    next_requested: bool,
}

/// Per-domain grace-period controller.
pub(crate) struct GraceControl {
    /// Number of the newest batch. Read lock-free; advanced under `inner`.
    cur: AtomicI64,
    /// Number of the newest *completed* batch. Always trails or equals
    /// `cur`.
    completed: AtomicI64,
    inner: Mutex<CtrlInner>,
}

impl GraceControl {
    pub(crate) fn new() -> Self {
        Self {
            cur: AtomicI64::new(BATCH_SEED),
            completed: AtomicI64::new(BATCH_SEED),
            inner: Mutex::new(CtrlInner {
                pending: CpuSet::new(),
                next_requested: false,
            }),
        }
    }

    /// Number of the newest batch (lock-free).
    #[inline]
    pub(crate) fn current_batch(&self) -> i64 {
        self.cur.load(Ordering::Acquire)
    }

    /// Number of the newest completed batch (lock-free).
    #[inline]
    pub(crate) fn completed_batch(&self) -> i64 {
        self.completed.load(Ordering::Acquire)
    }

    /// Is a batch currently active?
    #[inline]
    pub(crate) fn batch_active(&self) -> bool {
        self.completed_batch() != self.current_batch()
    }

    /// Request that a batch be started. Coalesces: any number of concurrent
    /// requests while a batch is active queue exactly one follow-up batch.
    /// `eligible` is the set of processors that must quiesce (online and
    /// not parked) if a batch starts now.
    pub(crate) fn request_batch(&self, eligible: &CpuSet) {
        let mut inner = self.inner.lock();
        inner.next_requested = true;
        self.start_batch_locked(&mut inner, eligible);
    }

    /// Record that `cpu` passed a quiescent state, but only if `seen` still
    /// matches the current batch (guards the race where the batch advanced
    /// again between the detector's steps). Returns true if it reported.
    pub(crate) fn quiesce_if_current(&self, cpu: usize, seen: i64, eligible: &CpuSet) -> bool {
        let mut inner = self.inner.lock();
        if seen != self.cur.load(Ordering::Relaxed) {
            return false;
        }
        self.cpu_quiet_locked(&mut inner, cpu, eligible);
        true
    }

    /// Unconditionally discharge `cpu`'s quiescence obligation for the
    /// active batch, if any. Used when a processor goes offline or parks:
    /// the batch must not wait on a processor that can no longer tick.
    pub(crate) fn quiesce_departing(&self, cpu: usize, eligible: &CpuSet) {
        let mut inner = self.inner.lock();
        if self.batch_active() && inner.pending.contains(cpu) {
            self.cpu_quiet_locked(&mut inner, cpu, eligible);
        }
    }

    /// Snapshot of the pending set (for reschedule hints and stall logs).
    pub(crate) fn pending_snapshot(&self) -> CpuSet {
        self.inner.lock().pending
    }

    /// Start the requested batch if none is active. Loops because seeding
    /// can come up empty (every eligible processor parked), in which case
    /// the batch completes immediately and a queued request may start the
    /// next one.
    fn start_batch_locked(&self, inner: &mut CtrlInner, eligible: &CpuSet) {
        while inner.next_requested && !self.batch_active() {
            inner.next_requested = false;
            inner.pending = *eligible;

            let next = self.cur.load(Ordering::Relaxed).wrapping_add(1);
            if inner.pending.is_empty() {
                // No one owes a quiescent state: the batch is complete the
                // instant it exists.
                self.cur.store(next, Ordering::Release);
                self.completed.store(next, Ordering::Release);
                continue;
            }

            // The pending set must be finalized before any processor can
            // observe the new batch number and start reporting against it.
            fence(Ordering::Release);
            self.cur.store(next, Ordering::Release);
            return;
        }
    }

    /// `cpu` went through a quiescent state since the batch began. Clear it
    /// from the pending set; if it was the last one, complete the batch and
    /// start the next if requested.
    fn cpu_quiet_locked(&self, inner: &mut CtrlInner, cpu: usize, eligible: &CpuSet) {
        inner.pending.clear(cpu);
        if inner.pending.is_empty() {
            let cur = self.cur.load(Ordering::Relaxed);
            let completed = self.completed.load(Ordering::Relaxed);
            assert!(
                !batch_before(cur, completed),
                "Grace: completed batch {} ahead of current {}",
                completed,
                cur
            );
            self.completed.store(cur, Ordering::Release);
            log::debug!("Grace: batch {} completed", cur);
            self.start_batch_locked(inner, eligible);
        }
    }
}
