//! Per-processor callback state.
//!
//! Each online processor owns one [`CpuQueues`] per domain, grouped into a
//! [`CpuSlot`]. The three callback sequences live behind two locks: the
//! `incoming`/`current` pair under one mutex (only ever touched from the
//! owning processor's contexts), and `done` under its own lock so the
//! remote-offload drainer can try-lock it independently of the local paths.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, AtomicUsize, Ordering};

use spin::Mutex;

use crate::callback::CallbackQueue;
use crate::ctrl::GraceControl;

/// Who is currently allowed to drain a queue's `done` sequence.
///
/// Set from `Idle` by compare-and-swap; cleared unconditionally by whichever
/// side finishes. Prevents the owning processor's batch processor and a
/// remote drainer from invoking the same records twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum DrainOwner {
    /// Nobody is draining.
    Idle = 0,
    /// The owning processor's batch processor holds the sequence.
    Local = 1,
    /// A remote-offload helper holds the sequence.
    Remote = 2,
}

/// The `incoming`/`current` sequence pair, mutated only from the owning
/// processor's execution contexts.
pub(crate) struct SeqGroup {
    /// Newly enqueued records; no batch number assigned yet.
    pub incoming: CallbackQueue,
    /// Records waiting on batch `assigned_batch` to complete.
    pub current: CallbackQueue,
    /// The batch whose completion releases `current`.
    pub assigned_batch: i64,
}

/// Per-(domain, processor) callback queues and detector state.
pub(crate) struct CpuQueues {
    /// `incoming` and `current` sequences.
    pub seqs: Mutex<SeqGroup>,
    /// Grace-period-complete records awaiting invocation. Own lock so the
    /// remote drainer can try-lock it without touching the local paths.
    pub done: Mutex<CallbackQueue>,
    /// Record count across all three sequences. Atomic RMW only: the remote
    /// drainer decrements it cross-processor.
    pub qlen: AtomicUsize,
    /// This processor's last-observed current batch number.
    pub seen_batch: AtomicI64,
    /// A quiescent state is owed for `seen_batch`.
    pub qs_owed: AtomicBool,
    /// A quiescent point has passed since the batch was adopted.
    pub qs_passed: AtomicBool,
    /// Per-drain invocation cap; `usize::MAX` while overloaded.
    pub budget: AtomicUsize,
    /// Tri-state drain gate, see [`DrainOwner`].
    pub drain_owner: AtomicU8,
    /// Queue length at the last cross-processor hint round (rate limiter).
    pub last_hint_qlen: AtomicUsize,
}

impl CpuQueues {
    pub(crate) fn new(ctrl: &GraceControl, default_budget: usize) -> Self {
        Self {
            seqs: Mutex::new(SeqGroup {
                incoming: CallbackQueue::new(),
                current: CallbackQueue::new(),
                assigned_batch: 0,
            }),
            done: Mutex::new(CallbackQueue::new()),
            qlen: AtomicUsize::new(0),
            // Seed from the completed batch: a processor coming online is
            // never asked to retroactively quiesce for batches it could not
            // have observed.
            seen_batch: AtomicI64::new(ctrl.completed_batch()),
            qs_owed: AtomicBool::new(false),
            qs_passed: AtomicBool::new(false),
            budget: AtomicUsize::new(default_budget),
            drain_owner: AtomicU8::new(DrainOwner::Idle as u8),
            last_hint_qlen: AtomicUsize::new(0),
        }
    }

    /// Try to claim the `done` sequence for `owner`. Fails if any drain is
    /// already in flight.
    pub(crate) fn try_claim_drain(&self, owner: DrainOwner) -> bool {
        self.drain_owner
            .compare_exchange(
                DrainOwner::Idle as u8,
                owner as u8,
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    /// Release the `done` sequence. Asserts the caller actually held it.
    pub(crate) fn release_drain(&self, owner: DrainOwner) {
        let prev = self.drain_owner.swap(DrainOwner::Idle as u8, Ordering::Release);
        assert_eq!(prev, owner as u8, "drain-owner gate corrupted");
    }
}

/// All per-domain queue state for one processor.
pub(crate) struct CpuSlot {
    /// The processor id this slot belongs to.
    pub cpu: usize,
    /// One `CpuQueues` per domain, indexed by `DomainId`.
    pub domains: Vec<CpuQueues>,
}

impl CpuSlot {
    pub(crate) fn new<'a, I>(cpu: usize, ctrls: I, default_budget: usize) -> Self
    where
        I: Iterator<Item = &'a GraceControl>,
    {
        Self {
            cpu,
            domains: ctrls
                .map(|ctrl| CpuQueues::new(ctrl, default_budget))
                .collect(),
        }
    }
}
