//! Fixed-capacity processor bitmask.
//!
//! `CpuSet` is the engine's working representation for "which processors":
//! the pending set of an active batch, the parked (tickless) mask, and the
//! remote-offload designated set. Every mutation site already holds a lock,
//! so the words are plain integers rather than atomics.

use core::fmt;

use static_assertions::const_assert;

use crate::MAX_CPUS;

const WORD_BITS: usize = u64::BITS as usize;
const WORDS: usize = MAX_CPUS / WORD_BITS;

const_assert!(MAX_CPUS % 64 == 0);
const_assert!(MAX_CPUS <= 4096);

/// A set of processor ids in `0..MAX_CPUS`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CpuSet {
    words: [u64; WORDS],
}

impl CpuSet {
    /// Empty set (no processors).
    pub const fn new() -> Self {
        Self { words: [0; WORDS] }
    }

    /// Set containing a single processor.
    pub fn single(cpu: usize) -> Self {
        let mut set = Self::new();
        set.set(cpu);
        set
    }

    /// Add a processor to the set.
    pub fn set(&mut self, cpu: usize) {
        assert!(cpu < MAX_CPUS, "cpu {} out of range", cpu);
        self.words[cpu / WORD_BITS] |= 1 << (cpu % WORD_BITS);
    }

    /// Remove a processor from the set.
    pub fn clear(&mut self, cpu: usize) {
        assert!(cpu < MAX_CPUS, "cpu {} out of range", cpu);
        self.words[cpu / WORD_BITS] &= !(1 << (cpu % WORD_BITS));
    }

    /// Does the set contain this processor?
    pub fn contains(&self, cpu: usize) -> bool {
        cpu < MAX_CPUS && self.words[cpu / WORD_BITS] & (1 << (cpu % WORD_BITS)) != 0
    }

    /// Is the set empty?
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Number of processors in the set.
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Lowest processor id in the set, if any.
    pub fn first_set(&self) -> Option<usize> {
        for (i, word) in self.words.iter().enumerate() {
            if *word != 0 {
                return Some(i * WORD_BITS + word.trailing_zeros() as usize);
            }
        }
        None
    }

    /// Next set processor strictly after `prev`, wrapping around to the
    /// lowest id. With a single member the result is `prev` itself. This is
    /// the round-robin primitive behind the offload cursor: the wrap point
    /// comes from the mask contents, never from a fixed processor-count
    /// bound.
    pub fn next_set_after(&self, prev: usize) -> Option<usize> {
        if self.is_empty() {
            return None;
        }
        let start = if prev >= MAX_CPUS { 0 } else { prev + 1 };
        for offset in 0..MAX_CPUS {
            let cpu = (start + offset) % MAX_CPUS;
            if self.contains(cpu) {
                return Some(cpu);
            }
        }
        None
    }

    /// Intersection.
    pub fn and(&self, other: &CpuSet) -> CpuSet {
        let mut out = *self;
        for (w, o) in out.words.iter_mut().zip(other.words.iter()) {
            *w &= *o;
        }
        out
    }

    /// Set difference (`self` minus `other`).
    pub fn and_not(&self, other: &CpuSet) -> CpuSet {
        let mut out = *self;
        for (w, o) in out.words.iter_mut().zip(other.words.iter()) {
            *w &= !*o;
        }
        out
    }

    /// Iterate over set processors in ascending order.
    pub fn iter(&self) -> CpuSetIter<'_> {
        CpuSetIter { set: self, next: 0 }
    }
}

impl Default for CpuSet {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Ascending iterator over a [`CpuSet`].
#[derive(Debug)]
pub struct CpuSetIter<'a> {
    set: &'a CpuSet,
    next: usize,
}

impl Iterator for CpuSetIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        while self.next < MAX_CPUS {
            let cpu = self.next;
            self.next += 1;
            if self.set.contains(cpu) {
                return Some(cpu);
            }
        }
        None
    }
}
