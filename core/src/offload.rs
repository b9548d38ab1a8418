//! Remote-offload membership and rotation.
//!
//! Remote callback processing lets a configured ("designated") subset of
//! processors have their completed-callback draining performed by the other
//! processors, keeping invocation cost off latency-sensitive processors.
//! Only the membership set and the round-robin cursor live here; the drain
//! itself is in the engine.

use spin::Mutex;

use crate::cpumask::CpuSet;

struct OffloadInner {
    /// Processors whose `done` sequences are drained remotely.
    designated: CpuSet,
    /// Last designated processor serviced; the next target is the next set
    /// bit after it, wrapping over the live mask. Rotation is derived from
    /// the mask contents so no designated processor can be starved.
    cursor: usize,
}

/// Designated-processor set plus rotating service cursor.
pub(crate) struct OffloadSet {
    inner: Mutex<OffloadInner>,
}

impl OffloadSet {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(OffloadInner {
                designated: CpuSet::new(),
                cursor: 0,
            }),
        }
    }

    /// Add or remove `cpu` from the designated set. Membership changes are
    /// rare; contention on this lock is not a concern.
    pub(crate) fn set(&self, cpu: usize, designated: bool) {
        let mut inner = self.inner.lock();
        if designated {
            inner.designated.set(cpu);
        } else {
            inner.designated.clear(cpu);
        }
    }

    /// Is `cpu` designated?
    pub(crate) fn is_designated(&self, cpu: usize) -> bool {
        self.inner.lock().designated.contains(cpu)
    }

    /// Is any processor designated?
    pub(crate) fn any_designated(&self) -> bool {
        !self.inner.lock().designated.is_empty()
    }

    /// Pick the next designated, online processor to service and advance
    /// the cursor. Returns `None` when no designated processor is online.
    pub(crate) fn next_target(&self, online: &CpuSet) -> Option<usize> {
        let mut inner = self.inner.lock();
        let live = inner.designated.and(online);
        let next = live.next_set_after(inner.cursor)?;
        inner.cursor = next;
        Some(next)
    }
}
