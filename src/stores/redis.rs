//! Redis-backed fast store.
//!
//! Accumulators live in Redis, so every process pointing at the same server
//! and prefix shares them. Layout under a prefix `p`:
//!
//! ```text
//!   p:acc:<member>       string   running sum, INCRBYFLOAT
//!   p:active:<namespace> set      members with a live accumulator
//!
//!   member = ["<collection>","<document_id>","<field_path>"]  (JSON)
//! ```
//!
//! An add is `INCRBYFLOAT` plus `SADD` in one `MULTI`/`EXEC`. Fetch-and-reset
//! is a server-side script running `GET`, `DEL` and `SREM` as one step, so an
//! add either lands before it (and is returned) or after it (and re-creates
//! both the accumulator and its index entry).
//!
//! # Feature Flag
//!
//! ```toml
//! [dependencies]
//! incrementi = { version = "0.1", features = ["redis"] }
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use incrementi::stores::RedisCounterStore;
//!
//! let counters = RedisCounterStore::connect("redis://127.0.0.1/", "incrementi").await?;
//! ```

use std::fmt::{self, Debug};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError, Script};
use serde_json::json;
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::key::BufferKey;
use crate::stores::AtomicCounterStore;

const FETCH_AND_RESET: &str = r#"
local value = redis.call('GET', KEYS[1])
if value then
    redis.call('DEL', KEYS[1])
end
redis.call('SREM', KEYS[2], ARGV[1])
return value
"#;

/// A fast store shared through a Redis server.
#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
    prefix: String,
    fetch_and_reset: Script,
}

impl RedisCounterStore {
    /// Connects to `url` and keeps all keys under `prefix`.
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self> {
        let client = Client::open(url).map_err(unavailable)?;
        let conn = ConnectionManager::new(client).await.map_err(unavailable)?;
        Ok(Self::new(conn, prefix))
    }

    /// Wraps an existing connection. Connection lifecycle stays with the
    /// caller.
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
            fetch_and_reset: Script::new(FETCH_AND_RESET),
        }
    }

    /// Returns the key prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Deletes every accumulator of `namespace` and its index.
    ///
    /// Not atomic with concurrent adds; meant for test teardown.
    pub async fn clear(&self, namespace: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let index = self.index_key(namespace);
        let members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(&index)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;

        let mut pipe = redis::pipe();
        for member in &members {
            pipe.cmd("DEL").arg(self.counter_key(member)).ignore();
        }
        pipe.cmd("DEL").arg(&index).ignore();
        let () = pipe.query_async(&mut conn).await.map_err(unavailable)?;
        Ok(())
    }

    fn counter_key(&self, member: &str) -> String {
        format!("{}:acc:{}", self.prefix, member)
    }

    fn index_key(&self, namespace: &str) -> String {
        format!("{}:active:{}", self.prefix, namespace)
    }
}

impl Debug for RedisCounterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

fn member(key: &BufferKey) -> String {
    json!([key.collection(), key.document_id(), key.field_path()]).to_string()
}

fn parse_member(member: &str) -> Option<BufferKey> {
    let (collection, document_id, field_path): (String, String, String) =
        serde_json::from_str(member).ok()?;
    BufferKey::derive(&collection, &document_id, &field_path).ok()
}

fn unavailable(e: RedisError) -> Error {
    Error::FastStoreUnavailable(e.to_string())
}

#[async_trait]
impl AtomicCounterStore for RedisCounterStore {
    async fn add_and_get(&self, key: &BufferKey, amount: f64) -> Result<f64> {
        let member = member(key);
        let mut conn = self.conn.clone();
        let (value,): (f64,) = redis::pipe()
            .atomic()
            .cmd("INCRBYFLOAT")
            .arg(self.counter_key(&member))
            .arg(amount)
            .cmd("SADD")
            .arg(self.index_key(key.collection()))
            .arg(&member)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(value)
    }

    async fn fetch_and_reset(&self, key: &BufferKey) -> Result<f64> {
        let member = member(key);
        let mut conn = self.conn.clone();
        let value: Option<f64> = self
            .fetch_and_reset
            .key(self.counter_key(&member))
            .key(self.index_key(key.collection()))
            .arg(&member)
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;
        trace!(%key, ?value, "fetched and reset accumulator");
        Ok(value.unwrap_or(0.0))
    }

    async fn list_active_keys(&self, namespace: &str) -> Result<Vec<BufferKey>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(self.index_key(namespace))
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;

        Ok(members
            .iter()
            .filter_map(|m| {
                let key = parse_member(m);
                if key.is_none() {
                    warn!(member = %m, namespace, "skipping malformed index entry");
                }
                key
            })
            .collect())
    }
}
