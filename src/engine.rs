//! The assembled engine.
//!
//! [`BufferedIncrements`] wires an [`IncrementBuffer`], a [`DrainEngine`]
//! and a [`FlushScheduler`] from the three construction inputs: the durable
//! collection handle, the fast store handle and a [`FlushConfig`].
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use incrementi::config::FlushConfig;
//! use incrementi::engine::BufferedIncrements;
//! use incrementi::stores::{MemoryCounterStore, MemoryDocumentStore};
//! use serde_json::json;
//!
//! # let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
//! # rt.block_on(async {
//! let users = Arc::new(MemoryDocumentStore::new("users"));
//! users.insert("user-1", json!({ "stats": {} }));
//!
//! let engine = BufferedIncrements::new(
//!     users.clone(),
//!     Arc::new(MemoryCounterStore::new()),
//!     FlushConfig::new(Duration::from_secs(2)),
//! )
//! .unwrap();
//!
//! engine.increment("user-1", "stats.totalCU", 1.5).await.unwrap();
//! engine.increment("user-1", "stats.totalCU", 2.0).await.unwrap();
//! assert_eq!(users.field("user-1", "stats.totalCU"), None);
//!
//! engine.flush().await.unwrap();
//! assert_eq!(users.field("user-1", "stats.totalCU"), Some(3.5));
//!
//! engine.shutdown().await.unwrap();
//! # });
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::apply::PersistApplier;
use crate::buffer::IncrementBuffer;
use crate::config::FlushConfig;
use crate::drain::{DrainEngine, DrainReport};
use crate::error::Result;
use crate::metrics::{FlushMetrics, MetricsSnapshot};
use crate::scheduler::FlushScheduler;
use crate::stores::{AtomicCounterStore, DocumentStore};

/// Buffered write-back increments for one durable collection.
pub struct BufferedIncrements {
    buffer: IncrementBuffer,
    scheduler: FlushScheduler,
    metrics: Arc<FlushMetrics>,
    config: FlushConfig,
}

impl BufferedIncrements {
    /// Builds an engine and starts its flush timer.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`](crate::Error::InvalidConfig) if the
    /// configuration does not validate.
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        counters: Arc<dyn AtomicCounterStore>,
        config: FlushConfig,
    ) -> Result<Self> {
        config.validate()?;
        let (buffer, engine, metrics) = Self::assemble(documents, counters, &config);
        let scheduler =
            FlushScheduler::start(engine, Arc::clone(&metrics), config.flush_interval);
        Ok(Self {
            buffer,
            scheduler,
            metrics,
            config,
        })
    }

    /// Builds an engine whose drains are driven by `trigger` instead of the
    /// clock. `config.flush_interval` is ignored.
    pub fn with_trigger(
        documents: Arc<dyn DocumentStore>,
        counters: Arc<dyn AtomicCounterStore>,
        config: FlushConfig,
        trigger: mpsc::Receiver<()>,
    ) -> Result<Self> {
        config.validate()?;
        let (buffer, engine, metrics) = Self::assemble(documents, counters, &config);
        let scheduler = FlushScheduler::with_trigger(engine, Arc::clone(&metrics), trigger);
        Ok(Self {
            buffer,
            scheduler,
            metrics,
            config,
        })
    }

    fn assemble(
        documents: Arc<dyn DocumentStore>,
        counters: Arc<dyn AtomicCounterStore>,
        config: &FlushConfig,
    ) -> (IncrementBuffer, Arc<DrainEngine>, Arc<FlushMetrics>) {
        let collection = documents.collection().to_string();
        let metrics = Arc::new(FlushMetrics::new());
        let buffer = IncrementBuffer::new(
            collection.clone(),
            Arc::clone(&counters),
            Arc::clone(&metrics),
        );
        let applier = PersistApplier::new(documents, Arc::clone(&counters), Arc::clone(&metrics));
        let engine = Arc::new(DrainEngine::new(
            collection,
            counters,
            applier,
            config.max_in_flight,
            Arc::clone(&metrics),
        ));
        (buffer, engine, metrics)
    }

    /// Buffers `amount` for `field_path` of document `entity_id`.
    ///
    /// See [`IncrementBuffer::increment`].
    pub async fn increment(&self, entity_id: &str, field_path: &str, amount: f64) -> Result<()> {
        self.buffer.increment(entity_id, field_path, amount).await
    }

    /// Drains now instead of waiting for the next tick.
    pub async fn flush(&self) -> Result<DrainReport> {
        self.scheduler.flush_now().await
    }

    /// Returns the collection this engine writes to.
    pub fn collection(&self) -> &str {
        self.buffer.collection()
    }

    /// Returns the configuration the engine was built with.
    pub fn config(&self) -> &FlushConfig {
        &self.config
    }

    /// Captures the engine metrics.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Stops the timer and, if `final_drain_on_shutdown` is set, drains
    /// whatever is still buffered.
    ///
    /// Without a final drain, increments buffered since the last cycle stay
    /// in the fast store until another engine drains them.
    pub async fn shutdown(self) -> Result<Option<DrainReport>> {
        let final_drain = self.config.final_drain_on_shutdown;
        info!(collection = self.collection(), final_drain, "shutting down buffered increments");
        self.scheduler.stop(final_drain).await
    }
}
