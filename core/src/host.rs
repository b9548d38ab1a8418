//! Host integration seam.
//!
//! The engine never owns a timer, a softirq queue, or an IPI path; the host
//! supplies all three through [`HostOps`]. Everything here must be safe to
//! call from restricted (interrupt-like) contexts: none of the operations
//! may block the caller.

/// Deferred work the engine posts to the host's softirq-like mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredWork {
    /// Run [`Engine::process_callbacks`](crate::Engine::process_callbacks)
    /// on the named processor.
    ProcessCallbacks,
    /// Run
    /// [`Engine::process_remote_callbacks`](crate::Engine::process_remote_callbacks)
    /// on the named processor (offload helpers only).
    ProcessRemote,
}

/// Operations the engine needs from its host.
///
/// Implementations must not block and must tolerate being called for a
/// processor that goes offline before the work runs (the engine cancels
/// pending work during offline, but the window is inherently racy).
pub trait HostOps: Send + Sync {
    /// Post `work` to run on `cpu` in deferred (softirq-like) context.
    /// Posting the same work kind twice before it runs may coalesce.
    fn queue_work(&self, cpu: usize, work: DeferredWork);

    /// Drop any deferred work queued for `cpu` (processor going offline).
    fn cancel_work(&self, cpu: usize);

    /// Ask `cpu` to run its periodic tick sooner than scheduled. Push (an
    /// IPI) or pull (a shorter poll interval) both satisfy the contract.
    fn reschedule_hint(&self, cpu: usize);
}

/// A host that drops all requests.
///
/// Suitable for tests and for pull-style embedders that drive
/// `process_callbacks` from their own loop instead of reacting to
/// `queue_work`.
#[derive(Debug, Default)]
pub struct NullHost;

impl HostOps for NullHost {
    fn queue_work(&self, _cpu: usize, _work: DeferredWork) {}

    fn cancel_work(&self, _cpu: usize) {}

    fn reschedule_hint(&self, _cpu: usize) {}
}
