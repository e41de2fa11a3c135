//! The increment entry point.
//!
//! [`IncrementBuffer`] turns `(entity_id, field_path, amount)` into an atomic
//! add on the fast store. It holds no state of its own, so any number of
//! buffers (in one process or many) can share a fast store: per-key ordering
//! is entirely the fast store's job.

use std::sync::Arc;

use tracing::trace;

use crate::error::{Error, Result};
use crate::key::BufferKey;
use crate::metrics::FlushMetrics;
use crate::stores::AtomicCounterStore;

/// Routes increments to the fast store.
pub struct IncrementBuffer {
    collection: String,
    counters: Arc<dyn AtomicCounterStore>,
    metrics: Arc<FlushMetrics>,
}

impl IncrementBuffer {
    /// Creates a buffer for `collection` writing to `counters`.
    pub fn new(
        collection: impl Into<String>,
        counters: Arc<dyn AtomicCounterStore>,
        metrics: Arc<FlushMetrics>,
    ) -> Self {
        Self {
            collection: collection.into(),
            counters,
            metrics,
        }
    }

    /// Returns the collection this buffer derives keys for.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Adds `amount` to the pending delta of `field_path` on `entity_id`.
    ///
    /// Resolves once the add is reflected in the fast store. The durable
    /// document is untouched until the next drain.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidAmount`] if `amount` is NaN or infinite.
    /// - [`Error::InvalidKeyDerivation`] if the id or path is malformed.
    /// - [`Error::FastStoreUnavailable`] if the fast store cannot be reached;
    ///   the call may be retried.
    pub async fn increment(&self, entity_id: &str, field_path: &str, amount: f64) -> Result<()> {
        if !amount.is_finite() {
            return Err(Error::InvalidAmount(amount));
        }
        let key = BufferKey::derive(&self.collection, entity_id, field_path)?;
        let pending = self.counters.add_and_get(&key, amount).await?;
        self.metrics.increments.add(1);
        trace!(%key, amount, pending, "buffered increment");
        Ok(())
    }
}
