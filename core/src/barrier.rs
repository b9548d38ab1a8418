//! Blocking rendezvous operations: `barrier` and `synchronize`.
//!
//! Both ride on the per-processor FIFO guarantee: a callback enqueued now
//! runs strictly after every callback enqueued earlier on the same
//! processor, so a broadcast of marker callbacks covers everything that was
//! queued anywhere before the call.

use alloc::sync::Arc;

use crate::domain::DomainId;
use crate::engine::Engine;
use crate::sync::Completion;

impl Engine {
    /// Block until every callback enqueued in `domain`, on any processor,
    /// as of this call has been invoked.
    ///
    /// Must not be called from a context that cannot block, and not while
    /// holding any lock a callback might take. Concurrent barrier callers
    /// are serialized.
    pub fn barrier(&self, domain: DomainId) {
        let _gate = self.barrier_gate.lock();
        let online = self.online_mask();
        let count = online.count();
        if count == 0 {
            return;
        }
        log::debug!("Barrier: armed across {} cpus", count);
        let completion = Arc::new(Completion::new(count));
        for cpu in online.iter() {
            let completion = Arc::clone(&completion);
            self.enqueue(domain, cpu, move || {
                completion.complete_one();
            });
        }
        completion.wait();
        log::debug!("Barrier: released");
    }

    /// Block until a full grace period in `domain` has elapsed: every
    /// processor online now passes a quiescent point before this returns.
    ///
    /// Same blocking contract as [`Engine::barrier`].
    pub fn synchronize(&self, domain: DomainId) {
        let _gate = self.barrier_gate.lock();
        let Some(cpu) = self.online_mask().first_set() else {
            return;
        };
        let completion = Arc::new(Completion::new(1));
        let marker = Arc::clone(&completion);
        self.enqueue(domain, cpu, move || {
            marker.complete_one();
        });
        completion.wait();
    }
}
