//! Drain cycles.
//!
//! One call to [`DrainEngine::drain_all`] is one cycle:
//!
//! ```text
//!   list_active_keys(namespace)
//!            │
//!            ▼
//!   ┌──── per key, up to max_in_flight at once ────┐
//!   │  fetch_and_reset(key) ──► 0.0 ? ──► skip     │
//!   │            │                                 │
//!   │            ▼                                 │
//!   │  PersistApplier::apply(key, delta)           │
//!   └──────────────────────────────────────────────┘
//!            │
//!            ▼
//!       DrainReport
//! ```
//!
//! The fetch-and-reset is a single store primitive. Reading the value and
//! clearing it in two calls would silently erase any increment landing in
//! between.
//!
//! Cycles must not overlap; [`FlushScheduler`](crate::scheduler::FlushScheduler)
//! enforces that for every drain it starts.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::apply::{ApplyOutcome, PersistApplier};
use crate::error::Result;
use crate::key::BufferKey;
use crate::metrics::FlushMetrics;
use crate::stores::AtomicCounterStore;

/// Summary of one drain cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DrainReport {
    /// Active keys found at the start of the cycle.
    pub keys_seen: usize,
    /// Deltas written to the durable store.
    pub applied: usize,
    /// Keys drained at exactly zero.
    pub skipped_zero: usize,
    /// Failed writes whose delta went back to the fast store.
    pub compensated: usize,
    /// Failed writes whose delta could not be re-buffered.
    pub lost: usize,
    /// Keys whose fetch-and-reset failed; they stay pending.
    pub fetch_failed: usize,
    /// Wall time of the cycle.
    #[serde(skip)]
    pub elapsed: Duration,
}

impl DrainReport {
    /// Returns `true` if every key was drained without failure.
    pub fn is_clean(&self) -> bool {
        self.compensated == 0 && self.lost == 0 && self.fetch_failed == 0
    }

    fn record(&mut self, step: KeyDrain) {
        match step {
            KeyDrain::FetchFailed => self.fetch_failed += 1,
            KeyDrain::Zero => self.skipped_zero += 1,
            KeyDrain::Applied(ApplyOutcome::Applied) => self.applied += 1,
            KeyDrain::Applied(ApplyOutcome::Compensated) => self.compensated += 1,
            KeyDrain::Applied(ApplyOutcome::Lost) => self.lost += 1,
        }
    }
}

enum KeyDrain {
    FetchFailed,
    Zero,
    Applied(ApplyOutcome),
}

/// Drains the accumulators of one namespace into the durable store.
pub struct DrainEngine {
    namespace: String,
    counters: Arc<dyn AtomicCounterStore>,
    applier: PersistApplier,
    max_in_flight: usize,
    metrics: Arc<FlushMetrics>,
}

impl DrainEngine {
    /// Creates an engine draining `namespace`.
    ///
    /// `max_in_flight` bounds how many keys are drained concurrently; values
    /// below 1 are treated as 1.
    pub fn new(
        namespace: impl Into<String>,
        counters: Arc<dyn AtomicCounterStore>,
        applier: PersistApplier,
        max_in_flight: usize,
        metrics: Arc<FlushMetrics>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            counters,
            applier,
            max_in_flight: max_in_flight.max(1),
            metrics,
        }
    }

    /// Returns the namespace this engine drains.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Runs one drain cycle over every active key of the namespace.
    ///
    /// Per-key failures are absorbed and counted in the report. The cycle
    /// itself fails only when the active keys cannot be listed.
    pub async fn drain_all(&self) -> Result<DrainReport> {
        let started = Instant::now();
        let keys = self.counters.list_active_keys(&self.namespace).await?;

        let mut report = DrainReport {
            keys_seen: keys.len(),
            ..DrainReport::default()
        };

        let steps: Vec<KeyDrain> = stream::iter(keys)
            .map(|key| async move { self.drain_key(&key).await })
            .buffer_unordered(self.max_in_flight)
            .collect()
            .await;

        for step in steps {
            report.record(step);
        }
        report.elapsed = started.elapsed();
        self.metrics.drain_completed();

        if report.is_clean() {
            debug!(namespace = %self.namespace, ?report, "drain cycle completed");
        } else {
            info!(namespace = %self.namespace, ?report, "drain cycle completed with failures");
        }
        Ok(report)
    }

    async fn drain_key(&self, key: &BufferKey) -> KeyDrain {
        let delta = match self.counters.fetch_and_reset(key).await {
            Ok(delta) => delta,
            Err(e) => {
                self.metrics.fetch_failures.add(1);
                warn!(%key, error = %e, "fetch-and-reset failed, key stays pending");
                return KeyDrain::FetchFailed;
            }
        };

        if delta == 0.0 {
            self.metrics.zero_skips.add(1);
            return KeyDrain::Zero;
        }

        KeyDrain::Applied(self.applier.apply(key, delta).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::stores::{MemoryCounterStore, MemoryDocumentStore};
    use serde_json::json;

    struct Fixture {
        engine: DrainEngine,
        documents: Arc<MemoryDocumentStore>,
        counters: Arc<MemoryCounterStore>,
    }

    fn fixture() -> Fixture {
        let documents = Arc::new(MemoryDocumentStore::new("users"));
        documents.insert("u1", json!({}));
        documents.insert("u2", json!({ "cu": 111 }));
        let counters = Arc::new(MemoryCounterStore::new());
        let metrics = Arc::new(FlushMetrics::new());
        let applier = PersistApplier::new(documents.clone(), counters.clone(), metrics.clone());
        let engine = DrainEngine::new("users", counters.clone(), applier, 4, metrics);
        Fixture {
            engine,
            documents,
            counters,
        }
    }

    fn key(id: &str) -> BufferKey {
        BufferKey::derive("users", id, "cu").unwrap()
    }

    #[tokio::test]
    async fn test_drain_applies_sums() {
        let f = fixture();
        f.counters.add(&key("u1"), 1.0).unwrap();
        f.counters.add(&key("u1"), 2.0).unwrap();
        f.counters.add(&key("u2"), -11.0).unwrap();

        let report = f.engine.drain_all().await.unwrap();
        assert_eq!(report.keys_seen, 2);
        assert_eq!(report.applied, 2);
        assert!(report.is_clean());
        assert_eq!(f.documents.field("u1", "cu"), Some(3.0));
        assert_eq!(f.documents.field("u2", "cu"), Some(100.0));
        assert_eq!(f.counters.pending("users"), 0);
    }

    #[tokio::test]
    async fn test_zero_sum_performs_no_write() {
        let f = fixture();
        f.counters.add(&key("u1"), 5.0).unwrap();
        f.counters.add(&key("u1"), -5.0).unwrap();

        let report = f.engine.drain_all().await.unwrap();
        assert_eq!(report.skipped_zero, 1);
        assert_eq!(report.applied, 0);
        assert_eq!(f.documents.write_count(), 0);
        assert_eq!(f.documents.field("u1", "cu"), None);
    }

    #[tokio::test]
    async fn test_empty_drain() {
        let f = fixture();
        let report = f.engine.drain_all().await.unwrap();
        assert_eq!(report.keys_seen, 0);
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_other_namespaces_untouched() {
        let f = fixture();
        let foreign = BufferKey::derive("orgs", "o1", "cu").unwrap();
        f.counters.add(&foreign, 9.0).unwrap();
        f.counters.add(&key("u1"), 1.0).unwrap();

        let report = f.engine.drain_all().await.unwrap();
        assert_eq!(report.keys_seen, 1);
        assert_eq!(f.counters.peek(&foreign), Some(9.0));
    }

    #[tokio::test]
    async fn test_failed_key_does_not_block_others() {
        let f = fixture();
        f.counters.add(&key("ghost"), 4.0).unwrap();
        f.counters.add(&key("u1"), 1.0).unwrap();

        let report = f.engine.drain_all().await.unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(report.compensated, 1);
        assert!(!report.is_clean());
        assert_eq!(f.documents.field("u1", "cu"), Some(1.0));
        assert_eq!(f.counters.peek(&key("ghost")), Some(4.0));
    }

    #[tokio::test]
    async fn test_compensated_delta_retried_next_cycle() {
        let f = fixture();
        f.counters.add(&key("u1"), 7.0).unwrap();
        f.documents.set_available(false);
        let report = f.engine.drain_all().await.unwrap();
        assert_eq!(report.compensated, 1);
        assert_eq!(f.documents.field("u1", "cu"), None);

        f.documents.set_available(true);
        f.counters.add(&key("u1"), 1.0).unwrap();
        let report = f.engine.drain_all().await.unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(f.documents.field("u1", "cu"), Some(8.0));
    }

    #[tokio::test]
    async fn test_listing_failure_fails_cycle() {
        let f = fixture();
        f.counters.add(&key("u1"), 1.0).unwrap();
        f.counters.set_available(false);
        assert!(matches!(
            f.engine.drain_all().await,
            Err(Error::FastStoreUnavailable(_))
        ));
        f.counters.set_available(true);
        assert_eq!(f.counters.peek(&key("u1")), Some(1.0));
    }
}
