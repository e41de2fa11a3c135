//! # Incrementi - Buffered Write-Back Increments
//!
//! A Rust library that batches frequent, sparse numeric updates against many
//! independent documents. Increments are accumulated in a fast shared store
//! and periodically flushed as net sums into a durable document store, so a
//! thousand `+1`s on a hot document become a single write.
//!
//! ## The Problem
//!
//! Usage metrics (compute units, requests, bytes) are updated on nearly every
//! request. Writing each update straight into the system of record turns every
//! request into a durable write, and hot documents become contention points.
//!
//! ## The Solution: Write-Back Accumulators
//!
//! ```text
//!   caller ──increment──► IncrementBuffer ──add──► fast store (accumulators)
//!                                                         │
//!   timer ──tick──► FlushScheduler ──► DrainEngine ──fetch&reset (atomic)
//!                                           │
//!                                           ▼
//!                                    PersistApplier ──$inc──► durable store
//! ```
//!
//! ### Design Principles
//!
//! 1. **Atomic accumulation**: each increment is a single atomic add on the
//!    fast store. Any number of callers and engine instances may share one
//!    fast store; per-key ordering is the store's job.
//!
//! 2. **Atomic drain**: reading an accumulator and resetting it is a single
//!    primitive. An increment racing a drain is either in the drained value
//!    or left intact for the next cycle, never lost.
//!
//! 3. **Single-flight cycles**: drain cycles never overlap. A tick that finds
//!    a cycle in flight is skipped, not queued.
//!
//! 4. **No silent loss**: a delta the durable store refuses is added back to
//!    its accumulator and retried on the next cycle.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use incrementi::{BufferedIncrements, FlushConfig};
//! use incrementi::stores::{MemoryCounterStore, MemoryDocumentStore};
//! use serde_json::json;
//!
//! # let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
//! # rt.block_on(async {
//! let users = Arc::new(MemoryDocumentStore::new("users"));
//! users.insert("user-12345", json!({ "stats": {} }));
//!
//! let usage = BufferedIncrements::new(
//!     users.clone(),
//!     Arc::new(MemoryCounterStore::new()),
//!     FlushConfig::new(Duration::from_secs(2)),
//! )
//! .unwrap();
//!
//! usage.increment("user-12345", "stats.totalCU", 1.0).await.unwrap();
//!
//! // Write-back: nothing reaches the durable store before a drain.
//! assert_eq!(users.field("user-12345", "stats.totalCU"), None);
//!
//! // Shutdown runs a final drain by default.
//! usage.shutdown().await.unwrap();
//! assert_eq!(users.field("user-12345", "stats.totalCU"), Some(1.0));
//! # });
//! ```
//!
//! ## Loss Window
//!
//! The fast store is not a system of record. Increments buffered after the
//! last drain are lost if the process exits without
//! [`BufferedIncrements::shutdown`] (with `final_drain_on_shutdown`) or the
//! fast store is cleared.
//!
//! ## Backends
//!
//! | Feature | Backend | Description |
//! |---------|---------|-------------|
//! | (none) | [`stores::MemoryCounterStore`] | Sharded in-process fast store |
//! | (none) | [`stores::MemoryDocumentStore`] | JSON documents in memory |
//! | `mongodb` | `stores::MongoDocumentStore` | `$inc` on a MongoDB collection |
//! | `redis` | `stores::RedisCounterStore` | Accumulators shared by every process on one Redis server |

pub mod apply;
pub mod buffer;
pub mod config;
pub mod drain;
pub mod engine;
pub mod error;
pub mod key;
pub mod metrics;
pub mod scheduler;
pub mod stores;

pub use config::FlushConfig;
pub use engine::BufferedIncrements;
pub use error::{DocumentStoreError, Error, Result};
pub use key::BufferKey;
