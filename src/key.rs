//! Buffer keys addressing one accumulator.
//!
//! A [`BufferKey`] is the triple `(collection, document_id, field_path)`.
//! It is derived from the arguments of an increment call and only ever lives
//! in the fast store; the durable store never sees it.
//!
//! # Examples
//!
//! ```rust
//! use incrementi::key::BufferKey;
//!
//! let key = BufferKey::derive("users", "user-12345", "stats.totalCU").unwrap();
//! assert_eq!(key.collection(), "users");
//! assert_eq!(key.to_string(), "users/user-12345/stats.totalCU");
//!
//! // Empty path segments are rejected up front.
//! assert!(BufferKey::derive("users", "user-12345", "stats..totalCU").is_err());
//! ```

use std::fmt::{self, Display};

use crate::error::{Error, Result};

/// Composite identifier of one accumulator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferKey {
    collection: String,
    document_id: String,
    field_path: String,
}

impl BufferKey {
    /// Derives a key, validating every component.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKeyDerivation`] when the collection is empty,
    /// the document id is blank or contains control characters, or the field
    /// path has an empty segment, a `$`-prefixed segment or control
    /// characters.
    pub fn derive(collection: &str, document_id: &str, field_path: &str) -> Result<Self> {
        if collection.is_empty() {
            return Err(Error::InvalidKeyDerivation(
                "collection name is empty".to_string(),
            ));
        }
        validate_document_id(document_id)?;
        validate_field_path(field_path)?;

        Ok(Self {
            collection: collection.to_string(),
            document_id: document_id.to_string(),
            field_path: field_path.to_string(),
        })
    }

    /// Returns the collection (namespace) of this key.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Returns the id of the target document.
    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    /// Returns the dotted path of the target field.
    pub fn field_path(&self) -> &str {
        &self.field_path
    }
}

impl Display for BufferKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.collection, self.document_id, self.field_path
        )
    }
}

fn validate_document_id(document_id: &str) -> Result<()> {
    if document_id.trim().is_empty() {
        return Err(Error::InvalidKeyDerivation(
            "document id is empty".to_string(),
        ));
    }
    if document_id.chars().any(char::is_control) {
        return Err(Error::InvalidKeyDerivation(format!(
            "document id {document_id:?} contains control characters"
        )));
    }
    Ok(())
}

fn validate_field_path(field_path: &str) -> Result<()> {
    if field_path.is_empty() {
        return Err(Error::InvalidKeyDerivation(
            "field path is empty".to_string(),
        ));
    }
    if field_path.chars().any(char::is_control) {
        return Err(Error::InvalidKeyDerivation(format!(
            "field path {field_path:?} contains control characters"
        )));
    }
    for segment in field_path.split('.') {
        if segment.is_empty() {
            return Err(Error::InvalidKeyDerivation(format!(
                "field path {field_path:?} has an empty segment"
            )));
        }
        if segment.starts_with('$') {
            return Err(Error::InvalidKeyDerivation(format!(
                "field path {field_path:?} has an operator segment"
            )));
        }
    }
    Ok(())
}
