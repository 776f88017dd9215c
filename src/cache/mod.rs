//! Feed cache engine.
//!
//! This module provides the complete caching layer between the API and the
//! system-of-record:
//! - Flat key schema and partially-known list encoding
//! - Hit / partial hit / miss resolution of paginated reads
//! - Population, list splicing and mutation propagation
//! - Depth-limited TTL refresh across related entities
//!
//! Consistency is best effort. Every primitive is a single-key store
//! operation; concurrent mutations may interleave and heal through TTL.

pub mod codec;
pub mod expiry;
pub mod keys;
pub mod propagator;
pub mod reader;
pub mod resolver;
pub mod selftest;
pub mod splicer;
pub mod writer;

pub use keys::{Detail, EntityKind, ListField, RepostId};
pub use resolver::Window;
pub use selftest::{run_self_test, SelfTestResult};

use crate::error::Result;
use crate::metrics::SharedMetrics;
use crate::source::RecordSource;
use crate::store::SharedStore;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// The cache engine. Cheap to share behind an `Arc`; holds no locks.
pub struct FeedCache {
    pub(crate) store: SharedStore,
    pub(crate) source: Arc<dyn RecordSource>,
    pub(crate) metrics: SharedMetrics,
    ttl: chrono::Duration,
}

impl FeedCache {
    pub fn new(
        store: SharedStore,
        source: Arc<dyn RecordSource>,
        metrics: SharedMetrics,
        ttl: chrono::Duration,
    ) -> Self {
        Self {
            store,
            source,
            metrics,
            ttl,
        }
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    /// Expiry instant for keys written or refreshed now
    pub(crate) fn expiry_instant(&self) -> DateTime<Utc> {
        Utc::now() + self.ttl
    }

    pub async fn is_cached(&self, kind: EntityKind, detail: Detail, id: &str) -> Result<bool> {
        self.store
            .exists(&keys::presence_key(kind, detail, id))
            .await
    }

    /// Delete every cached key of an entity at both detail levels
    pub async fn evict(&self, kind: EntityKind, id: &str) -> Result<()> {
        let mut doomed = keys::family(kind, Detail::Full, id);
        if kind != EntityKind::Repost {
            doomed.extend(keys::family(kind, Detail::Basic, id));
        }
        self.store.del(&doomed).await?;
        self.metrics.record_eviction(doomed.len());
        debug!(kind = %kind, id = %id, keys = doomed.len(), "Evicted entity");
        Ok(())
    }

    /// Raw cached values of an entity's key family, for diagnostics
    pub async fn inspect(
        &self,
        kind: EntityKind,
        detail: Detail,
        id: &str,
    ) -> Result<BTreeMap<String, Value>> {
        let mut out = BTreeMap::new();
        for key in keys::family(kind, detail, id) {
            let value = if keys::is_list_key(kind, &key) {
                let items = self.store.lrange(&key).await?;
                if items.is_empty() {
                    Value::Null
                } else {
                    Value::from(items)
                }
            } else {
                self.store.get(&key).await?.map_or(Value::Null, Value::from)
            };
            out.insert(key, value);
        }
        Ok(out)
    }
}
