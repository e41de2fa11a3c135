//! Unified error type for buffering and flushing.
//!
//! Every public operation of the crate returns [`Result`], so callers handle
//! fast-store outages, rejected keys and configuration problems through a
//! single [`Error`] type. Durable-store implementations report through the
//! narrower [`DocumentStoreError`], which the applier wraps into
//! [`Error::PersistApplyFailed`].
//!
//! # Example
//!
//! ```rust
//! use incrementi::{Error, Result};
//!
//! fn check(amount: f64) -> Result<f64> {
//!     if amount.is_finite() {
//!         Ok(amount)
//!     } else {
//!         Err(Error::InvalidAmount(amount))
//!     }
//! }
//!
//! assert!(check(1.5).is_ok());
//! assert!(matches!(check(f64::NAN), Err(Error::InvalidAmount(_))));
//! ```

use thiserror::Error;

use crate::key::BufferKey;

/// Unified error type for all buffering operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The fast store could not be reached. Increments may be retried.
    #[error("fast store unavailable: {0}")]
    FastStoreUnavailable(String),

    /// A drained delta could not be written to the durable store.
    #[error("failed to apply {delta} to {key}: {source}")]
    PersistApplyFailed {
        key: BufferKey,
        delta: f64,
        #[source]
        source: DocumentStoreError,
    },

    /// The entity id or field path cannot form a buffer key.
    #[error("invalid key: {0}")]
    InvalidKeyDerivation(String),

    /// Increments must be finite numbers.
    #[error("invalid amount: {0}")]
    InvalidAmount(f64),

    /// The flush configuration is not usable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The flush configuration could not be parsed.
    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),
}

/// Result type for buffering operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type reported by [`DocumentStore`](crate::stores::DocumentStore)
/// implementations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DocumentStoreError {
    /// The durable store could not be reached.
    #[error("document store unavailable: {0}")]
    Unavailable(String),

    /// The target document does not exist. Documents are never upserted.
    #[error("document {id} not found")]
    DocumentNotFound { id: String },

    /// The field (or one of its parents) holds a non-numeric value.
    #[error("field {path} of document {id} is not numeric")]
    FieldNotNumeric { id: String, path: String },

    /// The store refused the write for another reason.
    #[error("write rejected: {0}")]
    Rejected(String),
}
