//! Engine tuning knobs.
//!
//! Defaults suit a general-purpose SMP configuration; embedders adjust them
//! with the builder methods before constructing an
//! [`Engine`](crate::Engine).

use crate::error::{Error, Result};

/// Tunable configuration for one engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tunables {
    /// Callbacks invoked per drain pass before the batch processor yields
    /// and reposts itself.
    pub invoke_budget: usize,
    /// Queue length that raises the overload signal (unbounded drain budget
    /// plus reschedule hints to processors still owing a quiescent state).
    pub high_water: usize,
    /// Queue length at which the overload signal is cleared and the default
    /// budget restored.
    pub low_water: usize,
    /// Minimum queue growth between successive cross-processor reschedule
    /// hint rounds from one overloaded queue.
    pub hint_interval: usize,
    /// Tick divider: `0` checks in on every tick; otherwise must be of the
    /// form `2^n - 1` and only ticks where `(now - cpu) & tick_divisor == 0`
    /// are processed.
    pub tick_divisor: u64,
    /// Ticks an active batch may age before a diagnostic stall warning is
    /// logged. `0` disables the stall detector.
    pub stall_ticks: u64,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            invoke_budget: 10,
            high_water: 10_000,
            low_water: 100,
            hint_interval: 1_000,
            tick_divisor: 0,
            stall_ticks: 0,
        }
    }
}

impl Tunables {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-drain invocation budget.
    pub fn with_invoke_budget(mut self, budget: usize) -> Self {
        self.invoke_budget = budget;
        self
    }

    /// Set the overload high-water mark.
    pub fn with_high_water(mut self, mark: usize) -> Self {
        self.high_water = mark;
        self
    }

    /// Set the overload low-water mark.
    pub fn with_low_water(mut self, mark: usize) -> Self {
        self.low_water = mark;
        self
    }

    /// Set the reschedule hint rate-limit interval.
    pub fn with_hint_interval(mut self, interval: usize) -> Self {
        self.hint_interval = interval;
        self
    }

    /// Set the tick divider (must be `0` or `2^n - 1`).
    pub fn with_tick_divisor(mut self, divisor: u64) -> Self {
        self.tick_divisor = divisor;
        self
    }

    /// Set the stall-warning threshold in ticks (`0` disables).
    pub fn with_stall_ticks(mut self, ticks: u64) -> Self {
        self.stall_ticks = ticks;
        self
    }

    /// Validate the configuration, naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.invoke_budget == 0 {
            return Err(Error::InvalidTunables("invoke_budget"));
        }
        if self.low_water >= self.high_water {
            return Err(Error::InvalidTunables("low_water"));
        }
        // 2^n - 1 has the property that d & (d + 1) == 0 (0 included).
        if self.tick_divisor & self.tick_divisor.wrapping_add(1) != 0 {
            return Err(Error::InvalidTunables("tick_divisor"));
        }
        Ok(())
    }
}
