//! Error types and result handling for the Lull engine.
//!
//! The error surface is deliberately narrow: almost every operation in the
//! engine is infallible by design (enqueue, tick, drain always make forward
//! progress). The fallible paths are construction-time validation and the
//! lifecycle hooks.

use core::fmt;

/// Result type alias for Lull operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the Lull engine.
///
/// Internal invariant violations (a completed batch ahead of the current
/// batch, a callback owned by two sequences, a corrupted drain-owner gate)
/// are not represented here: they are programming errors in the engine and
/// abort loudly via assertions instead of being reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// A tunable failed validation; carries the offending field name.
    InvalidTunables(&'static str),
    /// An engine was constructed with an empty domain list.
    NoDomains,
    /// A processor id is outside `0..MAX_CPUS`.
    CpuOutOfRange,
    /// `cpu_online` was called for a processor that is already online.
    CpuAlreadyOnline,
    /// An operation named a processor that is not online.
    CpuNotOnline,
}

impl Error {
    /// Human-readable description of the error.
    pub const fn message(&self) -> &'static str {
        match self {
            Error::InvalidTunables(_) => "tunable failed validation",
            Error::NoDomains => "engine requires at least one callback domain",
            Error::CpuOutOfRange => "processor id out of range",
            Error::CpuAlreadyOnline => "processor is already online",
            Error::CpuNotOnline => "processor is not online",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidTunables(field) => {
                write!(f, "tunable `{}` failed validation", field)
            }
            _ => f.write_str(self.message()),
        }
    }
}
