//! MongoDB-backed durable store.
//!
//! Each delta becomes one `updateOne({ _id }, { $inc: { <path>: delta } })`.
//! MongoDB applies `$inc` atomically per document, creates the field (and any
//! missing embedded documents) at zero, and refuses to increment a
//! non-numeric value. The update never upserts: a zero `matched_count`
//! means the document is missing.
//!
//! # Feature Flag
//!
//! ```toml
//! [dependencies]
//! incrementi = { version = "0.1", features = ["mongodb"] }
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use incrementi::stores::MongoDocumentStore;
//!
//! let client = mongodb::Client::with_uri_str("mongodb://localhost:27017").await?;
//! let users = client.database("app").collection("users");
//! let documents = MongoDocumentStore::new(users);
//! ```

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use mongodb::error::ErrorKind;
use mongodb::Collection;
use tracing::trace;

use crate::error::DocumentStoreError;
use crate::stores::DocumentStore;

/// A [`DocumentStore`] writing to one MongoDB collection.
#[derive(Debug, Clone)]
pub struct MongoDocumentStore {
    inner: Collection<Document>,
}

impl MongoDocumentStore {
    /// Wraps an existing collection handle. Connection lifecycle stays with
    /// the caller.
    pub fn new(collection: Collection<Document>) -> Self {
        Self { inner: collection }
    }

    /// Returns the raw collection handle.
    pub fn inner(&self) -> &Collection<Document> {
        &self.inner
    }
}

#[async_trait]
impl DocumentStore for MongoDocumentStore {
    fn collection(&self) -> &str {
        self.inner.name()
    }

    async fn increment_field(
        &self,
        document_id: &str,
        field_path: &str,
        delta: f64,
    ) -> Result<(), DocumentStoreError> {
        let mut increments = Document::new();
        increments.insert(field_path, Bson::Double(delta));

        let result = self
            .inner
            .update_one(doc! { "_id": document_id }, doc! { "$inc": increments })
            .await
            .map_err(|e| match e.kind.as_ref() {
                ErrorKind::Write(_) => DocumentStoreError::Rejected(e.to_string()),
                _ => DocumentStoreError::Unavailable(e.to_string()),
            })?;

        if result.matched_count == 0 {
            return Err(DocumentStoreError::DocumentNotFound {
                id: document_id.to_string(),
            });
        }

        trace!(
            collection = self.inner.name(),
            document_id,
            field_path,
            delta,
            "applied $inc"
        );
        Ok(())
    }
}
