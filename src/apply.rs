//! Applying drained deltas to the durable store.
//!
//! A delta handed to [`PersistApplier::apply`] has already left the fast
//! store, so it must not be dropped on failure. When the durable write fails
//! the applier adds the delta back to the same accumulator; the next drain
//! picks it up together with whatever arrived in the meantime.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::error::Error;
use crate::key::BufferKey;
use crate::metrics::FlushMetrics;
use crate::stores::{AtomicCounterStore, DocumentStore};

/// What happened to one drained delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The durable field was incremented.
    Applied,
    /// The durable write failed and the delta is pending again.
    Compensated,
    /// Both the durable write and the compensating add failed.
    Lost,
}

/// Writes drained deltas to the durable store.
pub struct PersistApplier {
    documents: Arc<dyn DocumentStore>,
    counters: Arc<dyn AtomicCounterStore>,
    metrics: Arc<FlushMetrics>,
}

impl PersistApplier {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        counters: Arc<dyn AtomicCounterStore>,
        metrics: Arc<FlushMetrics>,
    ) -> Self {
        Self {
            documents,
            counters,
            metrics,
        }
    }

    /// Increments `key.field_path()` of document `key.document_id()` by
    /// `delta`, re-injecting the delta into the fast store on failure.
    ///
    /// Never fails: the outcome is reported and logged instead.
    pub async fn apply(&self, key: &BufferKey, delta: f64) -> ApplyOutcome {
        let write = self
            .documents
            .increment_field(key.document_id(), key.field_path(), delta)
            .await;

        let source = match write {
            Ok(()) => {
                self.metrics.keys_applied.add(1);
                debug!(%key, delta, "applied delta");
                return ApplyOutcome::Applied;
            }
            Err(source) => source,
        };

        self.metrics.apply_failures.add(1);
        let failure = Error::PersistApplyFailed {
            key: key.clone(),
            delta,
            source,
        };
        warn!(error = %failure, "durable write failed, re-buffering delta");

        match self.counters.add_and_get(key, delta).await {
            Ok(_) => {
                self.metrics.compensations.add(1);
                ApplyOutcome::Compensated
            }
            Err(e) => {
                self.metrics.lost_deltas.add(1);
                error!(%key, delta, error = %e, "compensating add failed, delta lost");
                ApplyOutcome::Lost
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::{MemoryCounterStore, MemoryDocumentStore};
    use serde_json::json;

    struct Fixture {
        applier: PersistApplier,
        documents: Arc<MemoryDocumentStore>,
        counters: Arc<MemoryCounterStore>,
        metrics: Arc<FlushMetrics>,
    }

    fn fixture() -> Fixture {
        let documents = Arc::new(MemoryDocumentStore::new("users"));
        documents.insert("u1", json!({ "stats": {} }));
        let counters = Arc::new(MemoryCounterStore::new());
        let metrics = Arc::new(FlushMetrics::new());
        let applier = PersistApplier::new(documents.clone(), counters.clone(), metrics.clone());
        Fixture {
            applier,
            documents,
            counters,
            metrics,
        }
    }

    fn key(id: &str) -> BufferKey {
        BufferKey::derive("users", id, "stats.cu").unwrap()
    }

    #[tokio::test]
    async fn test_applied() {
        let f = fixture();
        assert_eq!(f.applier.apply(&key("u1"), 3.5).await, ApplyOutcome::Applied);
        assert_eq!(f.documents.field("u1", "stats.cu"), Some(3.5));
        assert_eq!(f.counters.peek(&key("u1")), None);
        assert_eq!(f.metrics.keys_applied.value(), 1);
    }

    #[tokio::test]
    async fn test_missing_document_compensates() {
        let f = fixture();
        assert_eq!(
            f.applier.apply(&key("ghost"), 2.0).await,
            ApplyOutcome::Compensated
        );
        assert_eq!(f.counters.peek(&key("ghost")), Some(2.0));
        assert_eq!(f.metrics.apply_failures.value(), 1);
        assert_eq!(f.metrics.compensations.value(), 1);
    }

    #[tokio::test]
    async fn test_compensation_merges_with_new_increments() {
        let f = fixture();
        f.documents.set_available(false);
        f.counters.add(&key("u1"), 1.0).unwrap();
        assert_eq!(
            f.applier.apply(&key("u1"), 5.0).await,
            ApplyOutcome::Compensated
        );
        assert_eq!(f.counters.peek(&key("u1")), Some(6.0));
    }

    #[tokio::test]
    async fn test_lost_when_both_stores_fail() {
        let f = fixture();
        f.documents.set_available(false);
        f.counters.set_available(false);
        assert_eq!(f.applier.apply(&key("u1"), 1.0).await, ApplyOutcome::Lost);
        assert_eq!(f.metrics.lost_deltas.value(), 1);
    }
}
