//! # Lull
//!
//! A quiescent-state deferred-reclamation engine ("grace periods") for SMP
//! kernels. Readers traverse shared structures without locks; writers queue
//! callbacks that run only after every processor that could hold a stale
//! reference has passed through a quiescent point.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Engine                              │
//! │  ┌─────────────┐  ┌──────────────────┐  ┌────────────────┐   │
//! │  │ GraceControl │  │ per-cpu queues   │  │ remote offload │   │
//! │  │ (per domain) │  │ incoming/current │  │ set + cursor   │   │
//! │  │ cur/completed│  │ /done + detector │  │                │   │
//! │  └─────────────┘  └──────────────────┘  └────────────────┘   │
//! │  ┌─────────────────────┐  ┌───────────────────────────────┐  │
//! │  │ barrier/synchronize │  │ lifecycle (online/offline,    │  │
//! │  │ (blocking callers)  │  │ tickless parking)             │  │
//! │  └─────────────────────┘  └───────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//!            ▲ enqueue / tick / process_callbacks        ▲ HostOps
//!            │ (host's per-cpu contexts)                 │ (deferred work,
//!            └────────────────────────────────────────────┘  hints)
//! ```
//!
//! The host wires [`Engine::tick`] into its periodic interrupt and runs
//! [`Engine::process_callbacks`] from its softirq-like deferred context in
//! response to [`HostOps::queue_work`]. Everything else is internal.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::new_without_default)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

// =============================================================================
// MODULE EXPORTS
// =============================================================================

mod barrier;
mod callback;
mod cpumask;
mod ctrl;
mod domain;
mod engine;
mod error;
mod host;
mod offload;
mod pcpu;
mod stats;
mod sync;
mod tunables;

#[cfg(test)]
mod tests;

// Re-exports for convenience
pub use callback::{Callback, CallbackQueue};
pub use cpumask::{CpuSet, CpuSetIter};
pub use domain::{DomainId, DomainSpec, QuiescencePolicy, TickFlags};
pub use engine::Engine;
pub use error::{Error, Result};
pub use host::{DeferredWork, HostOps, NullHost};
pub use stats::DomainStats;
pub use tunables::Tunables;

/// Maximum number of processors an engine instance can track.
pub const MAX_CPUS: usize = 256;
