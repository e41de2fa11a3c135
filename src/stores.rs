//! Store contracts and backends.
//!
//! The engine talks to two collaborators through traits:
//!
//! | Trait | Role | Backends |
//! |-------|------|----------|
//! | [`AtomicCounterStore`] | fast shared store holding accumulators | [`MemoryCounterStore`], `RedisCounterStore` (feature `redis`) |
//! | [`DocumentStore`] | durable store holding the documents | [`MemoryDocumentStore`], `MongoDocumentStore` (feature `mongodb`) |
//!
//! Any technology that honours the contracts can back an engine. The
//! contracts are deliberately small: the fast store must totally order adds
//! to one key and offer a single-step fetch-and-reset; the durable store must
//! increment one field atomically.
//!
//! # Example
//!
//! ```rust
//! use incrementi::key::BufferKey;
//! use incrementi::stores::{AtomicCounterStore, MemoryCounterStore};
//!
//! # let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! # rt.block_on(async {
//! let store = MemoryCounterStore::new();
//! let key = BufferKey::derive("users", "u1", "stats.cu").unwrap();
//!
//! store.add_and_get(&key, 1.5).await.unwrap();
//! store.add_and_get(&key, 2.0).await.unwrap();
//!
//! assert_eq!(store.fetch_and_reset(&key).await.unwrap(), 3.5);
//! assert_eq!(store.fetch_and_reset(&key).await.unwrap(), 0.0);
//! # });
//! ```

mod memory_counters;
mod memory_documents;

#[cfg(feature = "mongodb")]
pub mod mongo;

#[cfg(feature = "redis")]
pub mod redis;

pub use memory_counters::MemoryCounterStore;
pub use memory_documents::MemoryDocumentStore;

#[cfg(feature = "mongodb")]
pub use mongo::MongoDocumentStore;

#[cfg(feature = "redis")]
pub use self::redis::RedisCounterStore;

use async_trait::async_trait;

use crate::error::{DocumentStoreError, Result};
use crate::key::BufferKey;

/// Fast shared store offering atomic add and atomic fetch-and-reset.
#[async_trait]
pub trait AtomicCounterStore: Send + Sync {
    /// Atomically adds `amount` to the accumulator of `key`, creating it at
    /// zero first if absent, and returns the new value.
    ///
    /// Adds to one key are totally ordered, whichever process issues them.
    async fn add_and_get(&self, key: &BufferKey, amount: f64) -> Result<f64>;

    /// Atomically reads the accumulator of `key` and removes it.
    ///
    /// Returns `0.0` if the key is absent. No add can land between the read
    /// and the reset: a concurrent add is either part of the returned value
    /// or survives in a fresh accumulator.
    async fn fetch_and_reset(&self, key: &BufferKey) -> Result<f64>;

    /// Lists the keys of `namespace` holding an accumulator, without visiting
    /// other namespaces.
    async fn list_active_keys(&self, namespace: &str) -> Result<Vec<BufferKey>>;
}

/// Durable store offering atomic increment of a document field.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Name of the collection this handle writes to. Used as the namespace of
    /// the buffer keys.
    fn collection(&self) -> &str;

    /// Atomically adds `delta` to the field at `field_path` of document
    /// `document_id`, treating an absent field as zero.
    ///
    /// The document must already exist; it is never created.
    async fn increment_field(
        &self,
        document_id: &str,
        field_path: &str,
        delta: f64,
    ) -> std::result::Result<(), DocumentStoreError>;
}
