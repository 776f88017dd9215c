//! Mutation propagation.
//!
//! The API write path calls one hook per mutation after the
//! system-of-record has accepted the write. Each hook either upserts,
//! updates what is already cached, or evicts. Nothing here consults the
//! system-of-record; hooks receive the post-write records they need.
//!
//! Counters follow their lists: a counter moves only when the matching
//! list insert or removal actually changed the list. A Basic copy mirrors
//! the Full counter, or the authoritative record value when no Full copy
//! is cached.

use super::codec::literal_ids;
use super::keys::{self, field, Detail, EntityKind, ListField, RepostId};
use super::FeedCache;
use crate::error::Result;
use crate::model::{PostRecord, RepostRecord, User};
use crate::source::Fetched;
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, info};

impl FeedCache {
    /// Move `value` to the front of a list. Returns whether it was already
    /// present.
    async fn front_insert(&self, key: &str, value: &str) -> Result<bool> {
        let removed = self.store.lrem(key, value).await?;
        self.store.lpush(key, value).await?;
        Ok(removed > 0)
    }

    async fn remove_member(&self, key: &str, value: &str) -> Result<bool> {
        Ok(self.store.lrem(key, value).await? > 0)
    }

    /// Apply `delta` to a Full counter and mirror the result onto a Basic
    /// copy. With no Full copy, the Basic copy takes `authoritative`.
    async fn adjust_counter(
        &self,
        kind: EntityKind,
        id: &str,
        counter: &str,
        delta: Option<i64>,
        authoritative: Option<i64>,
    ) -> Result<()> {
        let full_key = keys::key(kind, Detail::Full, id, counter);
        let value = if self.is_cached(kind, Detail::Full, id).await? {
            match delta {
                Some(delta) => Some(self.store.incr_by(&full_key, delta).await?),
                None => match self.store.get(&full_key).await? {
                    Some(raw) => Some(raw.parse::<i64>()?),
                    None => authoritative,
                },
            }
        } else {
            authoritative
        };

        if let Some(value) = value {
            if self.is_cached(kind, Detail::Basic, id).await? {
                let basic_key = keys::key(kind, Detail::Basic, id, counter);
                self.store
                    .set_keep_ttl(&basic_key, &value.to_string())
                    .await?;
            }
        }
        Ok(())
    }

    /// A new user has no relationships anyone could have cached
    pub async fn create_user(&self, user: &User) -> Result<()> {
        self.metrics.record_mutation("create_user");
        debug!(username = %user.username, "User created, nothing cached to update");
        Ok(())
    }

    pub async fn create_post(&self, post: &PostRecord, author: &User) -> Result<()> {
        self.metrics.record_mutation("create_post");
        self.attach_to_author(post, author).await
    }

    async fn attach_to_author(&self, post: &PostRecord, author: &User) -> Result<()> {
        let username = &author.username;
        if !self.is_cached(EntityKind::User, Detail::Full, username).await? {
            return Ok(());
        }
        let at = self.expiry_instant();
        self.write_post_basic(post, author, at).await?;
        for list in [ListField::Posts, ListField::Feed] {
            self.front_insert(&keys::list_key(EntityKind::User, username, list), &post.id)
                .await?;
        }
        self.refresh_at(EntityKind::User, Detail::Full, username, at)
            .await?;
        Ok(())
    }

    /// `parent` is the post-write record of the post being replied to
    pub async fn create_reply(&self, reply: &PostRecord, author: &User, parent: &PostRecord) -> Result<()> {
        self.metrics.record_mutation("create_reply");
        self.attach_to_author(reply, author).await?;

        let mut delta = None;
        if self.is_cached(EntityKind::Post, Detail::Full, &parent.id).await? {
            let at = self.expiry_instant();
            self.write_post_basic(reply, author, at).await?;
            let key = keys::list_key(EntityKind::Post, &parent.id, ListField::Replies);
            if !self.front_insert(&key, &reply.id).await? {
                delta = Some(1);
            }
            self.refresh_at(EntityKind::Post, Detail::Full, &parent.id, at)
                .await?;
        }
        self.adjust_counter(
            EntityKind::Post,
            &parent.id,
            field::REPLY_COUNT,
            delta,
            Some(parent.reply_count),
        )
        .await
    }

    /// `post` is the post-write record of the reposted post
    pub async fn create_repost(
        &self,
        repost: &RepostRecord,
        author: &User,
        post: &PostRecord,
        post_author: &User,
    ) -> Result<()> {
        self.metrics.record_mutation("create_repost");
        let repost_id = repost.id().to_string();
        let at = self.expiry_instant();

        if self.is_cached(EntityKind::User, Detail::Full, &author.username).await? {
            self.write_repost(repost, author, post, post_author, at).await?;
            for list in [ListField::Reposts, ListField::Feed] {
                self.front_insert(&keys::list_key(EntityKind::User, &author.username, list), &repost_id)
                    .await?;
            }
            self.front_insert(
                &keys::list_key(EntityKind::User, &author.username, ListField::RepostedPosts),
                &post.id,
            )
            .await?;
            self.refresh_at(EntityKind::User, Detail::Full, &author.username, at)
                .await?;
        }

        let mut delta = None;
        if self.is_cached(EntityKind::Post, Detail::Full, &post.id).await? {
            self.write_user(author, Detail::Basic, at).await?;
            let key = keys::list_key(EntityKind::Post, &post.id, ListField::RepostedBy);
            if !self.front_insert(&key, &author.username).await? {
                delta = Some(1);
            }
            self.refresh_at(EntityKind::Post, Detail::Full, &post.id, at)
                .await?;
        }
        self.adjust_counter(
            EntityKind::Post,
            &post.id,
            field::REPOST_COUNT,
            delta,
            Some(post.repost_count),
        )
        .await
    }

    /// `post` carries the post-write record and whatever lists the API
    /// layer fetched; it is used to populate the post when uncached.
    pub async fn like(&self, liker: &User, post: &Fetched<PostRecord>) -> Result<()> {
        self.metrics.record_mutation("like");
        let record = &post.record;
        let at = self.expiry_instant();

        if self.is_cached(EntityKind::User, Detail::Full, &liker.username).await? {
            let author = post.related.user(&record.author_id)?;
            self.write_post_basic(record, author, at).await?;
            let key = keys::list_key(EntityKind::User, &liker.username, ListField::LikedPosts);
            self.front_insert(&key, &record.id).await?;
            self.refresh_at(EntityKind::User, Detail::Full, &liker.username, at)
                .await?;
        }

        let liked_by = keys::list_key(EntityKind::Post, &record.id, ListField::LikedBy);
        let mut delta = None;
        if self.is_cached(EntityKind::Post, Detail::Full, &record.id).await? {
            self.write_user(liker, Detail::Basic, at).await?;
            if !self.front_insert(&liked_by, &liker.username).await? {
                delta = Some(1);
            }
            self.refresh_at(EntityKind::Post, Detail::Full, &record.id, at)
                .await?;
        } else {
            // The record already counts this like
            self.upsert_post(post).await?;
            self.write_user(liker, Detail::Basic, at).await?;
            self.front_insert(&liked_by, &liker.username).await?;
            self.refresh_at(EntityKind::Post, Detail::Full, &record.id, at)
                .await?;
        }
        self.adjust_counter(
            EntityKind::Post,
            &record.id,
            field::LIKE_COUNT,
            delta,
            Some(record.like_count),
        )
        .await
    }

    /// `post` is the post-write record of the unliked post
    pub async fn unlike(&self, liker: &str, post: &PostRecord) -> Result<()> {
        self.metrics.record_mutation("unlike");
        self.detach_like(liker, &post.id).await?;

        let mut delta = None;
        if self.is_cached(EntityKind::Post, Detail::Full, &post.id).await? {
            let key = keys::list_key(EntityKind::Post, &post.id, ListField::LikedBy);
            if self.remove_member(&key, liker).await? {
                delta = Some(-1);
            }
            self.refresh(EntityKind::Post, Detail::Full, &post.id).await?;
        }
        self.adjust_counter(
            EntityKind::Post,
            &post.id,
            field::LIKE_COUNT,
            delta,
            Some(post.like_count),
        )
        .await
    }

    /// Liker side of an unlike
    async fn detach_like(&self, liker: &str, post_id: &str) -> Result<()> {
        if self.is_cached(EntityKind::User, Detail::Full, liker).await? {
            let key = keys::list_key(EntityKind::User, liker, ListField::LikedPosts);
            self.remove_member(&key, post_id).await?;
            self.refresh(EntityKind::User, Detail::Full, liker).await?;
        }
        Ok(())
    }

    /// `follower` and `followed` are post-write records. `followed` also
    /// carries lists for populating an uncached followed user.
    pub async fn follow(&self, follower: &User, followed: &Fetched<User>) -> Result<()> {
        self.metrics.record_mutation("follow");
        let target = &followed.record;
        let at = self.expiry_instant();
        let target_known = self.is_cached(EntityKind::User, Detail::Full, &target.username).await?
            || self.is_cached(EntityKind::User, Detail::Basic, &target.username).await?;

        let mut delta = None;
        if self.is_cached(EntityKind::User, Detail::Full, &follower.username).await? {
            self.write_user(target, Detail::Basic, at).await?;
            let key = keys::list_key(EntityKind::User, &follower.username, ListField::Following);
            if !self.front_insert(&key, &target.username).await? {
                delta = Some(1);
            }
            self.refresh_at(EntityKind::User, Detail::Full, &follower.username, at)
                .await?;
        }
        self.adjust_counter(
            EntityKind::User,
            &follower.username,
            field::FOLLOWING_COUNT,
            delta,
            Some(follower.following_count),
        )
        .await?;

        let followers = keys::list_key(EntityKind::User, &target.username, ListField::Followers);
        let mut delta = None;
        if self.is_cached(EntityKind::User, Detail::Full, &target.username).await? {
            self.write_user(follower, Detail::Basic, at).await?;
            if !self.front_insert(&followers, &follower.username).await? {
                delta = Some(1);
            }
            self.refresh_at(EntityKind::User, Detail::Full, &target.username, at)
                .await?;
        } else if !target_known {
            self.upsert_user(followed).await?;
            self.write_user(follower, Detail::Basic, at).await?;
            self.front_insert(&followers, &follower.username).await?;
            self.refresh_at(EntityKind::User, Detail::Full, &target.username, at)
                .await?;
        }
        self.adjust_counter(
            EntityKind::User,
            &target.username,
            field::FOLLOWER_COUNT,
            delta,
            Some(target.follower_count),
        )
        .await
    }

    /// Both arguments are post-write records
    pub async fn unfollow(&self, follower: &User, followed: &User) -> Result<()> {
        self.metrics.record_mutation("unfollow");

        let mut delta = None;
        if self.is_cached(EntityKind::User, Detail::Full, &follower.username).await? {
            let key = keys::list_key(EntityKind::User, &follower.username, ListField::Following);
            if self.remove_member(&key, &followed.username).await? {
                delta = Some(-1);
            }
            self.refresh(EntityKind::User, Detail::Full, &follower.username)
                .await?;
        }
        self.adjust_counter(
            EntityKind::User,
            &follower.username,
            field::FOLLOWING_COUNT,
            delta,
            Some(follower.following_count),
        )
        .await?;

        let mut delta = None;
        if self.is_cached(EntityKind::User, Detail::Full, &followed.username).await? {
            let key = keys::list_key(EntityKind::User, &followed.username, ListField::Followers);
            if self.remove_member(&key, &follower.username).await? {
                delta = Some(-1);
            }
            self.refresh(EntityKind::User, Detail::Full, &followed.username)
                .await?;
        }
        self.adjust_counter(
            EntityKind::User,
            &followed.username,
            field::FOLLOWER_COUNT,
            delta,
            Some(followed.follower_count),
        )
        .await
    }

    pub async fn edit_post(&self, post: &Fetched<PostRecord>) -> Result<()> {
        self.metrics.record_mutation("edit_post");
        let record = &post.record;
        self.upsert_post(post).await?;
        if self.is_cached(EntityKind::Post, Detail::Basic, &record.id).await? {
            let at = self.expiry_instant();
            self.write_post_scalars(record, Detail::Basic, at).await?;
        }
        Ok(())
    }

    pub async fn edit_user(&self, user: &Fetched<User>) -> Result<()> {
        self.metrics.record_mutation("edit_user");
        let record = &user.record;
        self.upsert_user(user).await?;
        if self.is_cached(EntityKind::User, Detail::Basic, &record.username).await? {
            let at = self.expiry_instant();
            self.write_user(record, Detail::Basic, at).await?;
        }
        Ok(())
    }

    /// Drop a deleted post, its cached reply subtree and every reference
    /// cached users hold to it. Returns the number of posts evicted.
    pub async fn delete_post(&self, post: &PostRecord) -> Result<usize> {
        self.metrics.record_mutation("delete_post");
        let purged = self.purge_post(post.id.clone(), Some(post.clone())).await?;
        info!(post = %post.id, purged, "Post deleted from cache");
        Ok(purged)
    }

    fn purge_post(&self, id: String, record: Option<PostRecord>) -> BoxFuture<'_, Result<usize>> {
        async move {
            let record = match record {
                Some(record) => Some(record),
                None => self.load_post_record(&id).await?,
            };
            let mut purged = 1;

            if self.is_cached(EntityKind::Post, Detail::Full, &id).await? {
                let replies = self.load_list(EntityKind::Post, &id, ListField::Replies).await?;
                for reply in literal_ids(&replies) {
                    purged += self.purge_post(reply.to_string(), None).await?;
                }

                let likers = self.load_list(EntityKind::Post, &id, ListField::LikedBy).await?;
                for liker in literal_ids(&likers) {
                    self.detach_like(liker, &id).await?;
                }

                let reposters = self
                    .load_list(EntityKind::Post, &id, ListField::RepostedBy)
                    .await?;
                for reposter in literal_ids(&reposters) {
                    self.detach_repost(&RepostId::new(reposter, id.as_str())).await?;
                }
            }

            if let Some(record) = &record {
                let author = &record.author_id;
                if self.is_cached(EntityKind::User, Detail::Full, author).await? {
                    for list in [ListField::Posts, ListField::Feed] {
                        self.remove_member(&keys::list_key(EntityKind::User, author, list), &id)
                            .await?;
                    }
                    self.refresh(EntityKind::User, Detail::Full, author).await?;
                }
            }

            self.evict(EntityKind::Post, &id).await?;

            if let Some(parent) = record.as_ref().and_then(|r| r.reply_to.as_deref()) {
                if self.is_cached(EntityKind::Post, Detail::Full, parent).await? {
                    let key = keys::list_key(EntityKind::Post, parent, ListField::Replies);
                    let delta = self.remove_member(&key, &id).await?.then_some(-1);
                    self.adjust_counter(EntityKind::Post, parent, field::REPLY_COUNT, delta, None)
                        .await?;
                    self.refresh(EntityKind::Post, Detail::Full, parent).await?;
                } else if self.is_cached(EntityKind::Post, Detail::Basic, parent).await? {
                    let key = keys::key(EntityKind::Post, Detail::Basic, parent, field::REPLY_COUNT);
                    if let Some(raw) = self.store.get(&key).await? {
                        if raw.parse::<i64>()? > 0 {
                            self.store.incr_by(&key, -1).await?;
                        }
                    }
                }
            }

            debug!(post = %id, "Purged post");
            Ok(purged)
        }
        .boxed()
    }

    /// Reposter side of an unrepost: evict the repost and drop it from the
    /// author's lists
    async fn detach_repost(&self, repost: &RepostId) -> Result<()> {
        let repost_id = repost.to_string();
        self.evict(EntityKind::Repost, &repost_id).await?;

        let author = &repost.author;
        if self.is_cached(EntityKind::User, Detail::Full, author).await? {
            for list in [ListField::Reposts, ListField::Feed] {
                self.remove_member(&keys::list_key(EntityKind::User, author, list), &repost_id)
                    .await?;
            }
            self.remove_member(
                &keys::list_key(EntityKind::User, author, ListField::RepostedPosts),
                &repost.post,
            )
            .await?;
            self.refresh(EntityKind::User, Detail::Full, author).await?;
        }
        Ok(())
    }

    /// `post` is the post-write record of the reposted post
    pub async fn delete_repost(&self, repost: &RepostRecord, post: &PostRecord) -> Result<()> {
        self.metrics.record_mutation("delete_repost");
        self.detach_repost(&repost.id()).await?;

        let mut delta = None;
        if self.is_cached(EntityKind::Post, Detail::Full, &post.id).await? {
            let key = keys::list_key(EntityKind::Post, &post.id, ListField::RepostedBy);
            if self.remove_member(&key, &repost.author_id).await? {
                delta = Some(-1);
            }
            self.refresh(EntityKind::Post, Detail::Full, &post.id).await?;
        }
        self.adjust_counter(
            EntityKind::Post,
            &post.id,
            field::REPOST_COUNT,
            delta,
            Some(post.repost_count),
        )
        .await
    }
}
