//! Callback domains and quiescence proof obligations.
//!
//! A domain is an independent instance of the whole grace-period machinery.
//! The state machine is identical across domains; the only thing that
//! varies is *what counts as a quiescent state*, expressed here as a
//! [`QuiescencePolicy`] evaluated against the context flags of a timer tick.

use bitflags::bitflags;

/// Identifies one callback domain within an engine.
///
/// The value is an index into the domain list the engine was constructed
/// with. The constants below match the conventional two-domain layout built
/// by [`Engine::with_default_domains`](crate::Engine::with_default_domains).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DomainId(pub usize);

impl DomainId {
    /// The process-context domain (quiesces in user mode or true idle).
    pub const NORMAL: DomainId = DomainId(0);
    /// The softirq-class domain (quiesces anywhere outside a softirq).
    pub const SOFTIRQ: DomainId = DomainId(1);
}

bitflags! {
    /// Execution context of a periodic tick, as reported by the host.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TickFlags: u8 {
        /// The tick interrupted user-mode execution.
        const USER_MODE  = 1 << 0;
        /// The tick interrupted the idle task.
        const IDLE       = 1 << 1;
        /// A softirq handler was executing.
        const IN_SOFTIRQ = 1 << 2;
        /// The tick interrupt nested inside another hard interrupt.
        const NESTED_IRQ = 1 << 3;
    }
}

/// Proof obligation for a quiescent state: given the context of a tick,
/// can this processor be holding a reference taken before the tick?
#[derive(Clone, Copy)]
pub enum QuiescencePolicy {
    /// User-mode execution, or idle outside any softirq with no nested
    /// interrupt. Implies `OutsideSoftirq`, so one tick can prove
    /// quiescence for both default domains at once.
    UserOrIdle,
    /// Any context not inside a softirq handler.
    OutsideSoftirq,
    /// Embedder-defined predicate for additional domains.
    Custom(fn(TickFlags) -> bool),
}

impl QuiescencePolicy {
    /// Does a tick taken with `flags` count as a quiescent point?
    pub fn permits(&self, flags: TickFlags) -> bool {
        match self {
            QuiescencePolicy::UserOrIdle => {
                flags.contains(TickFlags::USER_MODE)
                    || (flags.contains(TickFlags::IDLE)
                        && !flags.contains(TickFlags::IN_SOFTIRQ)
                        && !flags.contains(TickFlags::NESTED_IRQ))
            }
            QuiescencePolicy::OutsideSoftirq => !flags.contains(TickFlags::IN_SOFTIRQ),
            QuiescencePolicy::Custom(predicate) => predicate(flags),
        }
    }
}

impl core::fmt::Debug for QuiescencePolicy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            QuiescencePolicy::UserOrIdle => f.write_str("UserOrIdle"),
            QuiescencePolicy::OutsideSoftirq => f.write_str("OutsideSoftirq"),
            QuiescencePolicy::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Static description of one domain.
#[derive(Debug, Clone, Copy)]
pub struct DomainSpec {
    /// Short name used in log messages.
    pub name: &'static str,
    /// The domain's quiescence proof obligation.
    pub policy: QuiescencePolicy,
}

impl DomainSpec {
    /// The process-context domain.
    pub const fn normal() -> Self {
        Self {
            name: "normal",
            policy: QuiescencePolicy::UserOrIdle,
        }
    }

    /// The softirq-class domain.
    pub const fn softirq() -> Self {
        Self {
            name: "softirq",
            policy: QuiescencePolicy::OutsideSoftirq,
        }
    }

    /// A custom domain with an embedder-supplied predicate.
    pub const fn custom(name: &'static str, predicate: fn(TickFlags) -> bool) -> Self {
        Self {
            name,
            policy: QuiescencePolicy::Custom(predicate),
        }
    }
}
