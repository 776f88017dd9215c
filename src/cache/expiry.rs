//! Transitive TTL refresh.
//!
//! Refreshing a Full entity re-arms its own keys and the Basic copies of
//! every literal member of its lists. Basic refreshes only touch keys and
//! never walk lists, so the cascade is at most two levels deep however
//! cyclic the social graph is.

use super::codec::literal_ids;
use super::keys::{self, field, Detail, EntityKind, RepostId};
use super::FeedCache;
use crate::error::Result;
use chrono::{DateTime, Utc};
use tracing::debug;

impl FeedCache {
    /// Re-arm the whole TTL family of an entity at a fresh expiry instant.
    /// Returns the number of keys touched.
    pub async fn refresh(&self, kind: EntityKind, detail: Detail, id: &str) -> Result<usize> {
        let at = self.expiry_instant();
        self.refresh_at(kind, detail, id, at).await
    }

    pub(crate) async fn refresh_at(
        &self,
        kind: EntityKind,
        detail: Detail,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<usize> {
        let touched = match (kind, detail) {
            (EntityKind::Repost, _) | (_, Detail::Basic) => self.refresh_basic(kind, id, at).await?,
            _ => self.refresh_full(kind, id, at).await?,
        };
        self.metrics.record_refresh(touched);
        debug!(kind = %kind, detail = %detail, id = %id, keys = touched, "Refreshed TTL family");
        Ok(touched)
    }

    /// Leaf operation: re-arm one entity's scalar keys
    async fn touch(&self, kind: EntityKind, detail: Detail, id: &str, at: DateTime<Utc>) -> Result<usize> {
        let keys = keys::scalar_family(kind, detail, id);
        self.store.expire_at(&keys, at).await?;
        Ok(keys.len())
    }

    /// Touch the Basic copy of a post and of its author
    async fn touch_post_basic(&self, id: &str, at: DateTime<Utc>) -> Result<usize> {
        let mut touched = self.touch(EntityKind::Post, Detail::Basic, id, at).await?;
        let author_key = keys::key(EntityKind::Post, Detail::Basic, id, field::AUTHOR);
        if let Some(author) = self.store.get(&author_key).await? {
            touched += self.touch(EntityKind::User, Detail::Basic, &author, at).await?;
        }
        Ok(touched)
    }

    async fn refresh_basic(&self, kind: EntityKind, id: &str, at: DateTime<Utc>) -> Result<usize> {
        match kind {
            EntityKind::User => self.touch(EntityKind::User, Detail::Basic, id, at).await,
            EntityKind::Post => self.touch_post_basic(id, at).await,
            EntityKind::Repost => {
                let repost: RepostId = id.parse()?;
                let mut touched = self.touch(EntityKind::Repost, Detail::Full, id, at).await?;
                touched += self
                    .touch(EntityKind::User, Detail::Basic, &repost.author, at)
                    .await?;
                touched += self.touch_post_basic(&repost.post, at).await?;
                Ok(touched)
            }
        }
    }

    async fn refresh_full(&self, kind: EntityKind, id: &str, at: DateTime<Utc>) -> Result<usize> {
        let mut touched = self.touch(kind, Detail::Full, id, at).await?;

        if kind == EntityKind::Post {
            let fields = [
                keys::key(kind, Detail::Full, id, field::AUTHOR),
                keys::key(kind, Detail::Full, id, field::REPLY_TO),
            ];
            let values = self.store.mget(&fields).await?;
            if let Some(Some(author)) = values.first() {
                touched += self.touch(EntityKind::User, Detail::Basic, author, at).await?;
            }
            if let Some(Some(parent)) = values.get(1).filter(|p| p.as_deref() != Some("")) {
                touched += self.touch_post_basic(parent, at).await?;
            }
        }

        for list in kind.list_fields() {
            let list_key = keys::list_key(kind, id, *list);
            self.store.expire_at(&[list_key], at).await?;
            touched += 1;

            let slots = self.load_list(kind, id, *list).await?;
            for member in literal_ids(&slots) {
                touched += self.refresh_basic(list.member_kind(member), member, at).await?;
            }
        }
        Ok(touched)
    }
}

#[cfg(test)]
mod tests {
    use crate::cache::keys::{Detail, EntityKind, ListField};
    use crate::cache::resolver::Window;
    use crate::source::RecordSource;
    use crate::store::Store;
    use crate::testkit;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_refresh_reaches_members_at_basic() {
        let (cache, store, source) = testkit::cache(testkit::graph());
        let fetched = source
            .fetch_user("alice", &[(ListField::Followers, Window::all())])
            .await
            .unwrap()
            .unwrap();
        cache.populate_user(Detail::Full, &fetched).await.unwrap();
        let before = store.expiry_of("user:basic:bob:bio").unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        cache
            .refresh(EntityKind::User, Detail::Full, "alice")
            .await
            .unwrap();

        let after = store.expiry_of("user:basic:bob:bio").unwrap();
        assert!(after > before);
        assert_eq!(store.expiry_of("user:full:alice:followers"), Some(after));
        assert_eq!(store.expiry_of("user:full:alice:email"), Some(after));
    }

    #[tokio::test]
    async fn test_refresh_terminates_on_cycles() {
        // alice follows bob and bob follows alice, both cached at full
        let (cache, store, source) = testkit::cache(testkit::graph());
        for name in ["alice", "bob"] {
            let fetched = source
                .fetch_user(
                    name,
                    &[
                        (ListField::Followers, Window::all()),
                        (ListField::Following, Window::all()),
                        (ListField::Feed, Window::all()),
                    ],
                )
                .await
                .unwrap()
                .unwrap();
            cache.populate_user(Detail::Full, &fetched).await.unwrap();
        }

        let ops_before = store.op_count();
        let touched = cache
            .refresh(EntityKind::User, Detail::Full, "alice")
            .await
            .unwrap();
        let ops = store.op_count() - ops_before;

        assert!(touched > 0);
        // one pass over alice's lists; nothing recurses into bob's lists
        assert!(ops < 60, "refresh issued {} store operations", ops);
    }

    #[tokio::test]
    async fn test_unrefreshed_keys_expire() {
        let (cache, store, source) = testkit::cache(testkit::graph());
        let fetched = source.fetch_user("dave", &[]).await.unwrap().unwrap();
        cache.populate_user(Detail::Basic, &fetched).await.unwrap();
        assert!(cache
            .read_basic(EntityKind::User, "dave")
            .await
            .unwrap()
            .is_some());

        let keys = crate::cache::keys::family(EntityKind::User, Detail::Basic, "dave");
        store
            .expire_at(&keys, Utc::now() - Duration::seconds(1))
            .await
            .unwrap();
        assert!(cache
            .read_basic(EntityKind::User, "dave")
            .await
            .unwrap()
            .is_none());
    }
}
