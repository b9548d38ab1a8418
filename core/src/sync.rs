//! Blocking rendezvous primitive.
//!
//! [`Completion`] is the countdown latch behind `barrier` and
//! `synchronize`: armed to a count, decremented from callback context,
//! waited on by exactly the callers allowed to block.

use core::sync::atomic::{AtomicUsize, Ordering};

use cfg_if::cfg_if;

/// Countdown latch signalled from callback context.
#[derive(Debug)]
pub(crate) struct Completion {
    remaining: AtomicUsize,
}

impl Completion {
    /// Arm the latch to `count` outstanding signals.
    pub(crate) fn new(count: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(count),
        }
    }

    /// Record one signal; returns true if this was the last one.
    pub(crate) fn complete_one(&self) -> bool {
        let prev = self.remaining.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "completion signalled more times than armed");
        prev == 1
    }

    /// Has the count reached zero?
    pub(crate) fn is_done(&self) -> bool {
        self.remaining.load(Ordering::Acquire) == 0
    }

    /// Block until the count reaches zero. The only suspension point in the
    /// engine; callers must hold no engine locks.
    pub(crate) fn wait(&self) {
        while !self.is_done() {
            cfg_if! {
                if #[cfg(feature = "std")] {
                    std::thread::yield_now();
                } else {
                    core::hint::spin_loop();
                }
            }
        }
    }
}
