//! In-process fast store with sharded accumulators.
//!
//! [`MemoryCounterStore`] keeps one accumulator table per namespace. Each
//! table is split into cache-padded shards, and a key always maps to the same
//! shard, so every operation on a key runs under that shard's lock:
//!
//! ```text
//!   namespace "users"
//!   ┌───────────────────────────────────────────┐
//!   │ [Shard 0]  Mutex<{ key → f64, ... }>      │ ◄── add / fetch&reset of keys hashing to 0
//!   │ [Shard 1]  Mutex<{ key → f64, ... }>      │
//!   │    ...                                    │
//!   │ [Shard 63] Mutex<{ key → f64, ... }>      │
//!   └───────────────────────────────────────────┘
//! ```
//!
//! Adds to a key are totally ordered by the shard lock, and fetch-and-reset
//! removes the entry under the same lock, so an add can never fall between
//! the read and the reset. Unrelated keys rarely share a shard, which keeps
//! contention low when many callers increment different documents.
//!
//! Share one store between several engines with `Arc` to model several
//! processes sharing a fast store.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use crossbeam_utils::CachePadded;
use dashmap::DashMap;

use crate::error::{Error, Result};
use crate::key::BufferKey;
use crate::stores::AtomicCounterStore;

const NUM_SHARDS: usize = 64;

type Shard = CachePadded<Mutex<HashMap<BufferKey, f64>>>;

/// The accumulators of one namespace.
struct Accumulators {
    shards: Box<[Shard]>,
}

impl Accumulators {
    fn new() -> Self {
        Self {
            shards: (0..NUM_SHARDS)
                .map(|_| CachePadded::new(Mutex::new(HashMap::new())))
                .collect(),
        }
    }

    fn shard(&self, key: &BufferKey) -> MutexGuard<'_, HashMap<BufferKey, f64>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % NUM_SHARDS;
        // A panic while holding the lock cannot leave a half-written f64.
        self.shards[idx]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn keys(&self) -> Vec<BufferKey> {
        self.shards
            .iter()
            .flat_map(|shard| {
                shard
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .keys()
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }
}

/// A fast store living in process memory.
///
/// # Examples
///
/// ```rust
/// use incrementi::key::BufferKey;
/// use incrementi::stores::MemoryCounterStore;
///
/// let store = MemoryCounterStore::new();
/// let key = BufferKey::derive("users", "u1", "stats.cu").unwrap();
///
/// store.add(&key, 2.0).unwrap();
/// store.add(&key, -0.5).unwrap();
/// assert_eq!(store.peek(&key), Some(1.5));
///
/// assert_eq!(store.take(&key).unwrap(), 1.5);
/// assert_eq!(store.peek(&key), None);
/// ```
pub struct MemoryCounterStore {
    namespaces: DashMap<String, Arc<Accumulators>>,
    available: AtomicBool,
}

impl MemoryCounterStore {
    /// Creates an empty, reachable store.
    pub fn new() -> Self {
        Self {
            namespaces: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Simulates an outage: while unavailable every operation fails with
    /// [`Error::FastStoreUnavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Returns whether the store currently accepts operations.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Synchronous form of [`AtomicCounterStore::add_and_get`].
    pub fn add(&self, key: &BufferKey, amount: f64) -> Result<f64> {
        self.check_available()?;
        let accumulators = self.namespace(key.collection());
        let mut shard = accumulators.shard(key);
        let value = shard.entry(key.clone()).or_insert(0.0);
        *value += amount;
        Ok(*value)
    }

    /// Synchronous form of [`AtomicCounterStore::fetch_and_reset`].
    pub fn take(&self, key: &BufferKey) -> Result<f64> {
        self.check_available()?;
        let Some(accumulators) = self.existing_namespace(key.collection()) else {
            return Ok(0.0);
        };
        let mut shard = accumulators.shard(key);
        Ok(shard.remove(key).unwrap_or(0.0))
    }

    /// Synchronous form of [`AtomicCounterStore::list_active_keys`].
    pub fn keys(&self, namespace: &str) -> Result<Vec<BufferKey>> {
        self.check_available()?;
        Ok(self
            .existing_namespace(namespace)
            .map(|accumulators| accumulators.keys())
            .unwrap_or_default())
    }

    /// Returns the current accumulator of `key` without resetting it.
    ///
    /// Meant for tests and diagnostics; the engine never reads un-drained
    /// values.
    pub fn peek(&self, key: &BufferKey) -> Option<f64> {
        let accumulators = self.existing_namespace(key.collection())?;
        let shard = accumulators.shard(key);
        shard.get(key).copied()
    }

    /// Returns the number of live accumulators in `namespace`.
    pub fn pending(&self, namespace: &str) -> usize {
        self.existing_namespace(namespace)
            .map(|accumulators| accumulators.len())
            .unwrap_or(0)
    }

    /// Drops every accumulator. The fast store is not a system of record.
    pub fn clear(&self) {
        self.namespaces.clear();
    }

    fn check_available(&self) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(Error::FastStoreUnavailable(
                "in-memory counter store is offline".to_string(),
            ))
        }
    }

    fn namespace(&self, namespace: &str) -> Arc<Accumulators> {
        if let Some(existing) = self.existing_namespace(namespace) {
            return existing;
        }
        Arc::clone(
            self.namespaces
                .entry(namespace.to_string())
                .or_insert_with(|| Arc::new(Accumulators::new()))
                .value(),
        )
    }

    fn existing_namespace(&self, namespace: &str) -> Option<Arc<Accumulators>> {
        self.namespaces
            .get(namespace)
            .map(|entry| Arc::clone(entry.value()))
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for MemoryCounterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for entry in self.namespaces.iter() {
            map.entry(entry.key(), &entry.value().len());
        }
        map.finish()
    }
}

#[async_trait]
impl AtomicCounterStore for MemoryCounterStore {
    async fn add_and_get(&self, key: &BufferKey, amount: f64) -> Result<f64> {
        self.add(key, amount)
    }

    async fn fetch_and_reset(&self, key: &BufferKey) -> Result<f64> {
        self.take(key)
    }

    async fn list_active_keys(&self, namespace: &str) -> Result<Vec<BufferKey>> {
        self.keys(namespace)
    }
}
