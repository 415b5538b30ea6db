//! Shared state store.
//!
//! Every piece of cross-process state (context counters, accepted reads,
//! throughput samples, the job queue) lives behind [`StateStore`]. The server
//! builds one store at startup and hands it to every component as an
//! `Arc<dyn StateStore>`.
//!
//! - [`RedisStore`]: production backend, shared between API and worker processes
//! - [`MemoryStore`]: in-process backend for single-process runs and tests

mod memory;
mod redis_backend;

pub use memory::MemoryStore;
pub use redis_backend::RedisStore;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Errors raised by a store backend
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The Redis server or connection failed
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A counter key holds something that is not an integer
    #[error("Value at {key} is not an integer: {value:?}")]
    NotAnInteger { key: String, value: String },

    /// A command was applied to a key of another type
    #[error("Wrong type of value at {0}")]
    WrongType(String),
}

/// A write applied as part of an atomic batch
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    /// Set a string value, optionally with a time-to-live
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    /// Relative integer update; its new value is returned by [`StateStore::atomic`]
    IncrBy { key: String, delta: i64 },
    /// Refresh the time-to-live of an existing key
    Expire { key: String, ttl: Duration },
    /// Add members to a set
    SAdd { key: String, members: Vec<String> },
    /// Push values onto the head of a list
    LPush { key: String, values: Vec<String> },
    /// Keep only the given inclusive index range of a list
    LTrim { key: String, start: isize, stop: isize },
    /// Delete keys
    Del { keys: Vec<String> },
}

impl StoreOp {
    pub fn set(key: impl Into<String>, value: impl ToString, ttl: Option<Duration>) -> Self {
        Self::Set {
            key: key.into(),
            value: value.to_string(),
            ttl,
        }
    }

    pub fn incr_by(key: impl Into<String>, delta: i64) -> Self {
        Self::IncrBy {
            key: key.into(),
            delta,
        }
    }

    pub fn expire(key: impl Into<String>, ttl: Duration) -> Self {
        Self::Expire {
            key: key.into(),
            ttl,
        }
    }
}

/// Atomic key/value operations needed by the registry, the queue and the workers
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Round trip to the backend
    async fn ping(&self) -> Result<(), StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError>;

    async fn scard(&self, key: &str) -> Result<u64, StoreError>;

    /// Inclusive range, negative indices count from the tail
    async fn lrange(&self, key: &str, start: isize, stop: isize)
        -> Result<Vec<String>, StoreError>;

    /// Apply all operations as one unit. Returns the new values produced by the
    /// `IncrBy` operations, in the order they appear.
    async fn atomic(&self, ops: Vec<StoreOp>) -> Result<Vec<i64>, StoreError>;

    /// Pop from the tail of a list, waiting up to `timeout` for an element
    async fn blocking_pop(&self, list: &str, timeout: Duration)
        -> Result<Option<String>, StoreError>;

    /// Read a string value and delete it in the same step
    async fn take(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Read an integer value
    async fn get_i64(&self, key: &str) -> Result<Option<i64>, StoreError> {
        match self.get(key).await? {
            Some(value) => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| StoreError::NotAnInteger {
                    key: key.to_string(),
                    value,
                }),
            None => Ok(None),
        }
    }
}

pub type SharedStore = Arc<dyn StateStore>;
