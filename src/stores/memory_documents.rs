//! In-process durable store holding JSON documents.
//!
//! [`MemoryDocumentStore`] mirrors the semantics of a document database
//! increment: the target document must exist, missing intermediate objects
//! along the dotted path are created, an absent leaf counts as zero, and a
//! non-numeric value on the path rejects the write.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::{Map, Number, Value};

use crate::error::DocumentStoreError;
use crate::stores::DocumentStore;

/// A durable-store double keeping documents in memory.
///
/// # Examples
///
/// ```rust
/// use incrementi::stores::MemoryDocumentStore;
/// use serde_json::json;
///
/// let store = MemoryDocumentStore::new("users");
/// store.insert("u1", json!({ "stats": { "totalCU": 111 } }));
///
/// store.apply_increment("u1", "stats.totalCU", 4.5).unwrap();
/// assert_eq!(store.field("u1", "stats.totalCU"), Some(115.5));
/// ```
#[derive(Debug)]
pub struct MemoryDocumentStore {
    collection: String,
    documents: Mutex<HashMap<String, Value>>,
    writes: AtomicU64,
    available: AtomicBool,
}

impl MemoryDocumentStore {
    /// Creates an empty collection named `collection`.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            documents: Mutex::new(HashMap::new()),
            writes: AtomicU64::new(0),
            available: AtomicBool::new(true),
        }
    }

    /// Inserts or replaces a document.
    pub fn insert(&self, id: impl Into<String>, document: Value) {
        self.lock().insert(id.into(), document);
    }

    /// Returns a copy of a document.
    pub fn get(&self, id: &str) -> Option<Value> {
        self.lock().get(id).cloned()
    }

    /// Returns the numeric value at `field_path`, if present.
    pub fn field(&self, id: &str, field_path: &str) -> Option<f64> {
        let documents = self.lock();
        let mut current = documents.get(id)?;
        for segment in field_path.split('.') {
            current = current.as_object()?.get(segment)?;
        }
        current.as_f64()
    }

    /// Returns how many increments were successfully applied.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Simulates an outage: while unavailable every increment fails with
    /// [`DocumentStoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Synchronous form of [`DocumentStore::increment_field`].
    pub fn apply_increment(
        &self,
        document_id: &str,
        field_path: &str,
        delta: f64,
    ) -> Result<(), DocumentStoreError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(DocumentStoreError::Unavailable(format!(
                "collection {} is offline",
                self.collection
            )));
        }

        let mut documents = self.lock();
        let document =
            documents
                .get_mut(document_id)
                .ok_or_else(|| DocumentStoreError::DocumentNotFound {
                    id: document_id.to_string(),
                })?;

        let not_numeric = || DocumentStoreError::FieldNotNumeric {
            id: document_id.to_string(),
            path: field_path.to_string(),
        };

        let (parents, leaf) = match field_path.rsplit_once('.') {
            Some((parents, leaf)) => (Some(parents), leaf),
            None => (None, field_path),
        };

        let mut current = document.as_object_mut().ok_or_else(not_numeric)?;
        if let Some(parents) = parents {
            for segment in parents.split('.') {
                current = current
                    .entry(segment)
                    .or_insert_with(|| Value::Object(Map::new()))
                    .as_object_mut()
                    .ok_or_else(not_numeric)?;
            }
        }

        let previous = match current.get(leaf) {
            None | Some(Value::Null) => 0.0,
            Some(value) => value.as_f64().ok_or_else(not_numeric)?,
        };
        let updated = Number::from_f64(previous + delta).ok_or_else(|| {
            DocumentStoreError::Rejected(format!("{field_path} would overflow to non-finite"))
        })?;
        current.insert(leaf.to_string(), Value::Number(updated));

        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Value>> {
        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn increment_field(
        &self,
        document_id: &str,
        field_path: &str,
        delta: f64,
    ) -> Result<(), DocumentStoreError> {
        self.apply_increment(document_id, field_path, delta)
    }
}
