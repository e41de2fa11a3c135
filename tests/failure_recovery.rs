use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use incrementi::stores::{DocumentStore, MemoryCounterStore, MemoryDocumentStore};
use incrementi::{BufferedIncrements, DocumentStoreError, Error, FlushConfig};
use serde_json::json;

/// Fails the first `failures` writes, then delegates.
struct FlakyDocuments {
    inner: MemoryDocumentStore,
    failures: AtomicUsize,
}

#[async_trait]
impl DocumentStore for FlakyDocuments {
    fn collection(&self) -> &str {
        self.inner.collection()
    }

    async fn increment_field(
        &self,
        document_id: &str,
        field_path: &str,
        delta: f64,
    ) -> Result<(), DocumentStoreError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(DocumentStoreError::Unavailable("write timed out".into()));
        }
        self.inner.increment_field(document_id, field_path, delta).await
    }
}

/// Takes `delay` per write and records how many writes overlap.
struct SlowDocuments {
    inner: MemoryDocumentStore,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[async_trait]
impl DocumentStore for SlowDocuments {
    fn collection(&self) -> &str {
        self.inner.collection()
    }

    async fn increment_field(
        &self,
        document_id: &str,
        field_path: &str,
        delta: f64,
    ) -> Result<(), DocumentStoreError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let result = self.inner.increment_field(document_id, field_path, delta).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[tokio::test(start_paused = true)]
async fn failed_writes_are_retried_on_the_next_cycle() {
    let inner = MemoryDocumentStore::new("users");
    inner.insert("u1", json!({ "stats": {} }));
    let documents = Arc::new(FlakyDocuments {
        inner,
        failures: AtomicUsize::new(2),
    });
    let engine = BufferedIncrements::new(
        documents.clone(),
        Arc::new(MemoryCounterStore::new()),
        FlushConfig::new(Duration::from_secs(1)),
    )
    .unwrap();

    engine.increment("u1", "stats.cu", 5.0).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(documents.inner.field("u1", "stats.cu"), None);

    engine.increment("u1", "stats.cu", 1.0).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(documents.inner.field("u1", "stats.cu"), None);

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(documents.inner.field("u1", "stats.cu"), Some(6.0));

    let metrics = engine.metrics();
    assert_eq!(metrics.apply_failures, 2);
    assert_eq!(metrics.compensations, 2);
    assert_eq!(metrics.keys_applied, 1);
    engine.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn slow_cycles_skip_ticks_instead_of_overlapping() {
    let inner = MemoryDocumentStore::new("users");
    inner.insert("u1", json!({}));
    let documents = Arc::new(SlowDocuments {
        inner,
        delay: Duration::from_millis(3500),
        in_flight: AtomicUsize::new(0),
        max_in_flight: AtomicUsize::new(0),
    });
    let engine = BufferedIncrements::new(
        documents.clone(),
        Arc::new(MemoryCounterStore::new()),
        FlushConfig::new(Duration::from_secs(1)),
    )
    .unwrap();

    engine.increment("u1", "cu", 1.0).await.unwrap();
    // The first cycle starts at t=1s and holds the write until t=4.5s.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    engine.increment("u1", "cu", 2.0).await.unwrap();

    tokio::time::sleep(Duration::from_millis(3200)).await;
    assert_eq!(documents.inner.field("u1", "cu"), Some(1.0));
    assert!(engine.metrics().ticks_skipped >= 3);

    // The second increment is drained by the t=5s cycle, done at t=8.5s.
    tokio::time::sleep(Duration::from_millis(4000)).await;
    assert_eq!(documents.inner.field("u1", "cu"), Some(3.0));
    assert_eq!(documents.max_in_flight.load(Ordering::SeqCst), 1);

    engine.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn flush_and_final_drain_wait_for_in_flight_cycle() {
    let inner = MemoryDocumentStore::new("users");
    inner.insert("u1", json!({}));
    let documents = Arc::new(SlowDocuments {
        inner,
        delay: Duration::from_millis(2500),
        in_flight: AtomicUsize::new(0),
        max_in_flight: AtomicUsize::new(0),
    });
    let engine = BufferedIncrements::new(
        documents.clone(),
        Arc::new(MemoryCounterStore::new()),
        FlushConfig::new(Duration::from_secs(2)),
    )
    .unwrap();

    engine.increment("u1", "cu", 1.0).await.unwrap();
    // The t=2s cycle holds the write until t=4.5s.
    tokio::time::sleep(Duration::from_millis(3000)).await;
    assert_eq!(documents.inner.field("u1", "cu"), None);

    // Waits for the timer cycle, then writes until t=7s.
    engine.increment("u1", "cu", 2.0).await.unwrap();
    let report = engine.flush().await.unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(documents.inner.field("u1", "cu"), Some(3.0));

    // The t=8s cycle holds the write until t=10.5s.
    engine.increment("u1", "cu", 4.0).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(documents.inner.field("u1", "cu"), Some(3.0));

    engine.increment("u1", "cu", 8.0).await.unwrap();
    let report = engine.shutdown().await.unwrap().unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(documents.inner.field("u1", "cu"), Some(15.0));
    assert_eq!(documents.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_document_keeps_delta_buffered() {
    let documents = Arc::new(MemoryDocumentStore::new("users"));
    let counters = Arc::new(MemoryCounterStore::new());
    let engine = BufferedIncrements::new(
        documents.clone(),
        counters.clone(),
        FlushConfig::new(Duration::from_secs(3600)),
    )
    .unwrap();

    engine.increment("late", "cu", 2.0).await.unwrap();
    let report = engine.flush().await.unwrap();
    assert_eq!(report.compensated, 1);
    assert!(documents.get("late").is_none());

    // Once the document exists the buffered delta lands.
    documents.insert("late", json!({}));
    let report = engine.flush().await.unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(documents.field("late", "cu"), Some(2.0));
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn fast_store_outage_surfaces_to_callers_and_cycles() {
    let documents = Arc::new(MemoryDocumentStore::new("users"));
    documents.insert("u1", json!({}));
    let counters = Arc::new(MemoryCounterStore::new());
    let engine = BufferedIncrements::new(
        documents.clone(),
        counters.clone(),
        FlushConfig::new(Duration::from_secs(3600)),
    )
    .unwrap();

    engine.increment("u1", "cu", 1.0).await.unwrap();
    counters.set_available(false);

    assert!(matches!(
        engine.increment("u1", "cu", 1.0).await,
        Err(Error::FastStoreUnavailable(_))
    ));
    assert!(matches!(
        engine.flush().await,
        Err(Error::FastStoreUnavailable(_))
    ));

    counters.set_available(true);
    engine.shutdown().await.unwrap();
    assert_eq!(documents.field("u1", "cu"), Some(1.0));
}
