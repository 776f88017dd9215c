//! In-process store with Redis semantics.
//!
//! Expiry is lazy: an expired key is dropped the next time it is looked
//! at. Every primitive bumps an operation counter so callers can bound the
//! amount of work a cache operation performs.

use super::Store;
use crate::error::{FeedCacheError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    List(VecDeque<String>),
}

#[derive(Debug, Clone)]
struct Stored {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Stored {
    fn live(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

fn wrong_type(key: &str) -> FeedCacheError {
    FeedCacheError::Store(format!(
        "WRONGTYPE operation against key '{}' holding the wrong kind of value",
        key
    ))
}

#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, Stored>,
    ops: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of primitives issued so far
    pub fn op_count(&self) -> u64 {
        self.ops.load(Ordering::Relaxed)
    }

    /// Live keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let now = Utc::now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| !e.value().is_expired(now))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Expiry instant of a live key
    pub fn expiry_of(&self, key: &str) -> Option<DateTime<Utc>> {
        self.purge_if_expired(key);
        self.entries.get(key).and_then(|e| e.expires_at)
    }

    fn tick(&self) {
        self.ops.fetch_add(1, Ordering::Relaxed);
    }

    fn purge_if_expired(&self, key: &str) {
        let now = Utc::now();
        self.entries.remove_if(key, |_, slot| slot.is_expired(now));
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.tick();
        self.purge_if_expired(key);
        match self.entries.get(key) {
            None => Ok(None),
            Some(entry) => match &entry.value {
                Value::Str(s) => Ok(Some(s.clone())),
                Value::List(_) => Err(wrong_type(key)),
            },
        }
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        self.tick();
        let now = Utc::now();
        Ok(keys
            .iter()
            .map(|key| {
                self.entries.remove_if(key, |_, slot| slot.is_expired(now));
                // MGET reports wrong-typed keys as absent
                self.entries.get(key).and_then(|e| match &e.value {
                    Value::Str(s) => Some(s.clone()),
                    Value::List(_) => None,
                })
            })
            .collect())
    }

    async fn mset(&self, pairs: &[(String, String)]) -> Result<()> {
        self.tick();
        for (key, value) in pairs {
            self.entries
                .insert(key.clone(), Stored::live(Value::Str(value.clone())));
        }
        Ok(())
    }

    async fn set_keep_ttl(&self, key: &str, value: &str) -> Result<()> {
        self.tick();
        self.purge_if_expired(key);
        let expires_at = self.entries.get(key).and_then(|e| e.expires_at);
        self.entries.insert(
            key.to_string(),
            Stored {
                value: Value::Str(value.to_string()),
                expires_at,
            },
        );
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.tick();
        self.purge_if_expired(key);
        Ok(self.entries.contains_key(key))
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        self.tick();
        self.purge_if_expired(key);
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Stored::live(Value::Str("0".to_string())));
        let current = match &entry.value {
            Value::Str(s) => s.parse::<i64>().map_err(|_| {
                FeedCacheError::Store(format!("value at '{}' is not an integer", key))
            })?,
            Value::List(_) => return Err(wrong_type(key)),
        };
        let next = current + delta;
        entry.value = Value::Str(next.to_string());
        Ok(next)
    }

    async fn expire_at(&self, keys: &[String], at: DateTime<Utc>) -> Result<()> {
        self.tick();
        for key in keys {
            self.purge_if_expired(key);
            if let Some(mut entry) = self.entries.get_mut(key) {
                entry.expires_at = Some(at);
            }
        }
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<()> {
        self.tick();
        for key in keys {
            self.entries.remove(key);
        }
        Ok(())
    }

    async fn lrange(&self, key: &str) -> Result<Vec<String>> {
        self.tick();
        self.purge_if_expired(key);
        match self.entries.get(key) {
            None => Ok(Vec::new()),
            Some(entry) => match &entry.value {
                Value::List(items) => Ok(items.iter().cloned().collect()),
                Value::Str(_) => Err(wrong_type(key)),
            },
        }
    }

    async fn rpush(&self, key: &str, values: &[String]) -> Result<()> {
        self.tick();
        self.purge_if_expired(key);
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Stored::live(Value::List(VecDeque::new())));
        match &mut entry.value {
            Value::List(items) => {
                items.extend(values.iter().cloned());
                Ok(())
            }
            Value::Str(_) => Err(wrong_type(key)),
        }
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<()> {
        self.tick();
        self.purge_if_expired(key);
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Stored::live(Value::List(VecDeque::new())));
        match &mut entry.value {
            Value::List(items) => {
                items.push_front(value.to_string());
                Ok(())
            }
            Value::Str(_) => Err(wrong_type(key)),
        }
    }

    async fn lrem(&self, key: &str, value: &str) -> Result<usize> {
        self.tick();
        self.purge_if_expired(key);
        let removed = match self.entries.get_mut(key) {
            None => return Ok(0),
            Some(mut entry) => match &mut entry.value {
                Value::List(items) => {
                    let before = items.len();
                    items.retain(|item| item != value);
                    before - items.len()
                }
                Value::Str(_) => return Err(wrong_type(key)),
            },
        };
        // Redis drops a list once its last element is removed
        self.entries.remove_if(key, |_, slot| {
            matches!(&slot.value, Value::List(items) if items.is_empty())
        });
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_strings_and_counters() {
        let store = MemoryStore::new();
        store
            .mset(&[("a".to_string(), "1".to_string())])
            .await
            .unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some("1".to_string()));
        assert_eq!(store.incr_by("a", 4).await.unwrap(), 5);
        assert_eq!(
            store.mget(&["a".to_string(), "b".to_string()]).await.unwrap(),
            vec![Some("5".to_string()), None]
        );
    }

    #[tokio::test]
    async fn test_lists_behave_like_redis() {
        let store = MemoryStore::new();
        store
            .rpush("l", &["x".to_string(), "y".to_string()])
            .await
            .unwrap();
        store.lpush("l", "w").await.unwrap();
        assert_eq!(store.lrange("l").await.unwrap(), vec!["w", "x", "y"]);

        assert_eq!(store.lrem("l", "x").await.unwrap(), 1);
        assert_eq!(store.lrem("l", "x").await.unwrap(), 0);
        store.lrem("l", "w").await.unwrap();
        store.lrem("l", "y").await.unwrap();
        assert!(!store.exists("l").await.unwrap());
        assert!(store.get("l").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expiry_is_lazy_and_keep_ttl_preserves_it() {
        let store = MemoryStore::new();
        store
            .mset(&[("k".to_string(), "v".to_string())])
            .await
            .unwrap();
        let later = Utc::now() + Duration::hours(1);
        store.expire_at(&["k".to_string()], later).await.unwrap();
        store.set_keep_ttl("k", "w").await.unwrap();
        assert_eq!(store.expiry_of("k"), Some(later));

        store
            .expire_at(&["k".to_string()], Utc::now() - Duration::seconds(1))
            .await
            .unwrap();
        assert!(store.get("k").await.unwrap().is_none());
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_expire_at_does_not_revive_expired_key() {
        let store = MemoryStore::new();
        store
            .mset(&[("k".to_string(), "v".to_string())])
            .await
            .unwrap();
        store
            .expire_at(&["k".to_string()], Utc::now() - Duration::seconds(1))
            .await
            .unwrap();
        store
            .expire_at(&["k".to_string()], Utc::now() + Duration::hours(1))
            .await
            .unwrap();
        assert!(store.get("k").await.unwrap().is_none());
        assert!(!store.exists("k").await.unwrap());
        assert_eq!(store.expiry_of("k"), None);
    }

    #[tokio::test]
    async fn test_wrong_type_is_a_store_error() {
        let store = MemoryStore::new();
        store.lpush("l", "x").await.unwrap();
        assert!(matches!(
            store.get("l").await,
            Err(FeedCacheError::Store(_))
        ));
    }
}
