//! Remote key-value store abstraction.
//!
//! The cache engine only needs string keys, ordered lists, per-key expiry
//! and atomic increments. `RedisStore` talks to a Redis server through a
//! multiplexed connection manager; `MemoryStore` keeps everything in
//! process and backs the tests and the `--memory` CLI mode.

pub mod memory;
pub mod redis_store;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Primitives the cache engine issues against its backing store.
///
/// Absent keys are never errors: `get` yields `None`, `lrange` an empty
/// list and `exists` false.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Values for `keys`, in order
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>>;

    /// Set several string keys. Clears any previous expiry on them.
    async fn mset(&self, pairs: &[(String, String)]) -> Result<()>;

    /// Overwrite a string value without touching its expiry
    async fn set_keep_ttl(&self, key: &str, value: &str) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64>;

    /// Arm expiry of existing keys at an absolute instant
    async fn expire_at(&self, keys: &[String], at: DateTime<Utc>) -> Result<()>;

    async fn del(&self, keys: &[String]) -> Result<()>;

    /// Whole list, front to back
    async fn lrange(&self, key: &str) -> Result<Vec<String>>;

    async fn rpush(&self, key: &str, values: &[String]) -> Result<()>;

    async fn lpush(&self, key: &str, value: &str) -> Result<()>;

    /// Remove every occurrence of `value`, returning how many were removed
    async fn lrem(&self, key: &str, value: &str) -> Result<usize>;
}

pub type SharedStore = Arc<dyn Store>;
