//! Monotone event tally with sharded atomic storage.
//!
//! [`Tally`] counts engine events (increments accepted, drain cycles, skipped
//! ticks, ...). Increments happen on every caller's hot path, so the count is
//! spread over cache-padded shards and only summed when a snapshot is taken.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

use crate::metrics::{NUM_COMPONENTS, THREAD_SLOT_INDEX};

/// A monotonically increasing counter using sharded atomic storage.
///
/// # Examples
///
/// ```rust
/// use incrementi::metrics::Tally;
///
/// let tally = Tally::new().with_name("drain_cycles");
/// tally.add(1);
/// tally.add(2);
/// assert_eq!(tally.value(), 3);
/// assert_eq!(tally.name(), "drain_cycles");
/// ```
pub struct Tally {
    name: &'static str,
    components: [CachePadded<AtomicU64>; NUM_COMPONENTS],
}

impl Tally {
    /// Creates a new tally initialized to zero.
    pub const fn new() -> Self {
        const ZERO: CachePadded<AtomicU64> = CachePadded::new(AtomicU64::new(0));
        Tally {
            components: [ZERO; NUM_COMPONENTS],
            name: "",
        }
    }

    /// Sets the name of this tally, returning `self` for method chaining.
    pub const fn with_name(self, name: &'static str) -> Self {
        Self { name, ..self }
    }

    /// Returns the name of this tally.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Adds `value` to the current thread's shard.
    #[inline]
    pub fn add(&self, value: u64) {
        self.component().fetch_add(value, Ordering::Relaxed);
    }

    #[inline]
    fn component(&self) -> &AtomicU64 {
        THREAD_SLOT_INDEX.with(|idx| &self.components[*idx])
    }

    /// Returns the sum over all shards.
    #[inline]
    pub fn value(&self) -> u64 {
        self.components
            .iter()
            .map(|counter| counter.load(Ordering::Relaxed))
            .sum()
    }
}

impl Default for Tally {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for Tally {
    /// Formats the tally showing non-zero shards: `name{ [slot]:value ... }`.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{{", self.name)?;
        for (i, counter) in self.components.iter().enumerate() {
            let val = counter.load(Ordering::Relaxed);
            if val != 0 {
                write!(f, " [{i}]:{val}")?;
            }
        }
        write!(f, " }}")
    }
}
