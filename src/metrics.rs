//! Engine metrics built on sharded per-thread tallies.
//!
//! Every engine instance owns a [`FlushMetrics`]. Callers bump it on the
//! increment path and the drain bumps it once per key, so the tallies use the
//! same sharding scheme as the counters they describe: each thread writes to
//! its own cache-padded slot and reads aggregate all slots.
//!
//! ```text
//!   Thread 0 ──add──►  [Slot 0]  (CachePadded)
//!   Thread 1 ──add──►  [Slot 1]  (CachePadded)
//!        ...              ...
//!   Thread 63 ─add──►  [Slot 63] (CachePadded)
//!                          │
//!                          ▼
//!                 value() sums all slots
//! ```
//!
//! # Example
//!
//! ```rust
//! use incrementi::metrics::FlushMetrics;
//!
//! let metrics = FlushMetrics::new();
//! metrics.increments.add(3);
//! metrics.drain_completed();
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.increments, 3);
//! assert_eq!(snapshot.drain_cycles, 1);
//! assert!(snapshot.last_drain_age_ms.is_some());
//! ```

mod tally;

pub use tally::Tally;

use atomic_time::AtomicOptionInstant;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

/// Number of shards (slots) used by each tally.
pub(crate) const NUM_COMPONENTS: usize = 64;

/// Global counter for assigning slot IDs to threads.
static NEXT_SLOT_ID: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    /// Slot index of the current thread, assigned lazily on first use.
    pub(crate) static THREAD_SLOT_INDEX: usize = get_next_slot_id();
}

/// Assigns the next slot ID, round-robin over `NUM_COMPONENTS`.
pub fn get_next_slot_id() -> usize {
    NEXT_SLOT_ID.fetch_add(1, Ordering::Relaxed) % NUM_COMPONENTS
}

/// Tallies describing one engine instance.
pub struct FlushMetrics {
    /// Increments accepted into the fast store.
    pub increments: Tally,
    /// Drain cycles that ran to completion.
    pub drain_cycles: Tally,
    /// Timer ticks dropped because a cycle was still in flight.
    pub ticks_skipped: Tally,
    /// Deltas written to the durable store.
    pub keys_applied: Tally,
    /// Keys drained at exactly zero (no durable write).
    pub zero_skips: Tally,
    /// Durable writes that failed.
    pub apply_failures: Tally,
    /// Failed deltas re-injected into the fast store.
    pub compensations: Tally,
    /// Deltas whose compensating add failed as well.
    pub lost_deltas: Tally,
    /// Per-key fetch-and-reset calls that failed.
    pub fetch_failures: Tally,
    last_drain: AtomicOptionInstant,
}

impl FlushMetrics {
    pub fn new() -> Self {
        Self {
            increments: Tally::new().with_name("increments"),
            drain_cycles: Tally::new().with_name("drain_cycles"),
            ticks_skipped: Tally::new().with_name("ticks_skipped"),
            keys_applied: Tally::new().with_name("keys_applied"),
            zero_skips: Tally::new().with_name("zero_skips"),
            apply_failures: Tally::new().with_name("apply_failures"),
            compensations: Tally::new().with_name("compensations"),
            lost_deltas: Tally::new().with_name("lost_deltas"),
            fetch_failures: Tally::new().with_name("fetch_failures"),
            last_drain: AtomicOptionInstant::none(),
        }
    }

    /// Records a completed drain cycle.
    pub fn drain_completed(&self) {
        self.drain_cycles.add(1);
        self.last_drain.store(Some(Instant::now()), Ordering::Relaxed);
    }

    /// Returns when the last drain cycle completed, if any.
    pub fn last_drain(&self) -> Option<Instant> {
        self.last_drain.load(Ordering::Relaxed)
    }

    /// Captures the current values of all tallies.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            increments: self.increments.value(),
            drain_cycles: self.drain_cycles.value(),
            ticks_skipped: self.ticks_skipped.value(),
            keys_applied: self.keys_applied.value(),
            zero_skips: self.zero_skips.value(),
            apply_failures: self.apply_failures.value(),
            compensations: self.compensations.value(),
            lost_deltas: self.lost_deltas.value(),
            fetch_failures: self.fetch_failures.value(),
            last_drain_age_ms: self
                .last_drain()
                .map(|at| at.elapsed().as_millis() as u64),
        }
    }
}

impl Default for FlushMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for FlushMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlushMetrics")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

/// A point-in-time, serializable copy of [`FlushMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub increments: u64,
    pub drain_cycles: u64,
    pub ticks_skipped: u64,
    pub keys_applied: u64,
    pub zero_skips: u64,
    pub apply_failures: u64,
    pub compensations: u64,
    pub lost_deltas: u64,
    pub fetch_failures: u64,
    /// Milliseconds since the last completed drain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_drain_age_ms: Option<u64>,
}
