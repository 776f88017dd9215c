//! Population of cached entities.
//!
//! Basic writes an entity's scalars. Full adds every relationship list,
//! encoding the known part of each page and stubbing the rest, and caches
//! every referenced member at Basic. All keys written in one population
//! share one expiry instant.

use super::codec::Slot;
use super::keys::{self, Detail, EntityKind, ListField};
use super::FeedCache;
use crate::error::Result;
use crate::model::{PostRecord, RepostRecord, User};
use crate::source::{Fetched, ListPage, Member, Related};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::debug;

/// Slots for a freshly populated list. An absent page is entirely unknown.
pub(crate) fn page_slots(page: Option<&ListPage>) -> Vec<Slot> {
    let Some(page) = page else {
        return vec![Slot::Open];
    };
    if page.offset > 0 && page.members.is_empty() {
        return vec![Slot::Open];
    }
    let mut slots = Vec::with_capacity(page.members.len() + 2);
    if page.offset > 0 {
        slots.push(Slot::Skip(page.offset));
    }
    slots.extend(page.ids().into_iter().map(Slot::Id));
    if !page.exhausted {
        slots.push(Slot::Open);
    }
    slots
}

fn field_pairs(
    kind: EntityKind,
    detail: Detail,
    id: &str,
    fields: Vec<(&'static str, String)>,
) -> Vec<(String, String)> {
    fields
        .into_iter()
        .map(|(f, v)| (keys::key(kind, detail, id, f), v))
        .collect()
}

impl FeedCache {
    async fn write_scalars(
        &self,
        kind: EntityKind,
        detail: Detail,
        id: &str,
        fields: Vec<(&'static str, String)>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let pairs = field_pairs(kind, detail, id, fields);
        let keys: Vec<String> = pairs.iter().map(|(k, _)| k.clone()).collect();
        self.store.mset(&pairs).await?;
        self.store.expire_at(&keys, at).await?;
        Ok(())
    }

    pub(crate) async fn write_user(&self, user: &User, detail: Detail, at: DateTime<Utc>) -> Result<()> {
        self.write_scalars(EntityKind::User, detail, &user.username, user.to_fields(), at)
            .await
    }

    /// Post scalars plus the media list, without the author
    pub(crate) async fn write_post_scalars(
        &self,
        post: &PostRecord,
        detail: Detail,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.write_scalars(EntityKind::Post, detail, &post.id, post.to_fields(), at)
            .await?;
        let media_key = keys::key(EntityKind::Post, detail, &post.id, keys::field::MEDIA);
        self.store.del(&[media_key.clone()]).await?;
        if !post.media.is_empty() {
            self.store.rpush(&media_key, &post.media).await?;
            self.store.expire_at(&[media_key], at).await?;
        }
        Ok(())
    }

    pub(crate) async fn write_post_basic(
        &self,
        post: &PostRecord,
        author: &User,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.write_user(author, Detail::Basic, at).await?;
        self.write_post_scalars(post, Detail::Basic, at).await
    }

    /// A repost together with its author, the reposted post and that
    /// post's author, all at Basic
    pub(crate) async fn write_repost(
        &self,
        repost: &RepostRecord,
        author: &User,
        post: &PostRecord,
        post_author: &User,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.write_user(author, Detail::Basic, at).await?;
        self.write_post_basic(post, post_author, at).await?;
        let id = repost.id().to_string();
        self.write_scalars(EntityKind::Repost, Detail::Full, &id, repost.to_fields(), at)
            .await
    }

    /// Cache one list member at Basic using the records in `related`
    pub(crate) async fn cache_member(
        &self,
        member: &Member,
        related: &Related,
        at: DateTime<Utc>,
    ) -> Result<()> {
        match member {
            Member::User(username) => {
                self.write_user(related.user(username)?, Detail::Basic, at)
                    .await
            }
            Member::Post(id) => {
                let post = related.post(id)?;
                self.write_post_basic(post, related.user(&post.author_id)?, at)
                    .await
            }
            Member::Repost(repost) => {
                let post = related.post(&repost.post_id)?;
                self.write_repost(
                    repost,
                    related.user(&repost.author_id)?,
                    post,
                    related.user(&post.author_id)?,
                    at,
                )
                .await
            }
        }
    }

    async fn write_lists(
        &self,
        kind: EntityKind,
        id: &str,
        lists: &BTreeMap<ListField, ListPage>,
        related: &Related,
        at: DateTime<Utc>,
    ) -> Result<()> {
        for list in kind.list_fields() {
            let page = lists.get(list);
            if let Some(page) = page {
                for member in &page.members {
                    self.cache_member(member, related, at).await?;
                }
            }
            self.persist_list(&keys::list_key(kind, id, *list), &page_slots(page), at)
                .await?;
        }
        Ok(())
    }

    pub async fn populate_user(&self, detail: Detail, fetched: &Fetched<User>) -> Result<()> {
        let at = self.expiry_instant();
        let user = &fetched.record;
        self.write_user(user, detail, at).await?;
        if detail == Detail::Full {
            self.write_lists(EntityKind::User, &user.username, &fetched.lists, &fetched.related, at)
                .await?;
        }
        debug!(username = %user.username, detail = %detail, "Populated user");
        Ok(())
    }

    pub async fn populate_post(&self, detail: Detail, fetched: &Fetched<PostRecord>) -> Result<()> {
        let at = self.expiry_instant();
        let post = &fetched.record;
        let author = fetched.related.user(&post.author_id)?;
        self.write_user(author, Detail::Basic, at).await?;
        self.write_post_scalars(post, detail, at).await?;

        if detail == Detail::Full {
            if let Some(parent_id) = &post.reply_to {
                let parent = fetched.related.post(parent_id)?;
                self.write_post_basic(parent, fetched.related.user(&parent.author_id)?, at)
                    .await?;
            }
            self.write_lists(EntityKind::Post, &post.id, &fetched.lists, &fetched.related, at)
                .await?;
        }
        debug!(post = %post.id, detail = %detail, "Populated post");
        Ok(())
    }

    /// Populate a user at Full, or merge into the existing Full copy
    pub async fn upsert_user(&self, fetched: &Fetched<User>) -> Result<()> {
        let username = &fetched.record.username;
        if !self.is_cached(EntityKind::User, Detail::Full, username).await? {
            return self.populate_user(Detail::Full, fetched).await;
        }
        let at = self.expiry_instant();
        self.write_user(&fetched.record, Detail::Full, at).await?;
        self.merge_pages(EntityKind::User, username, fetched, at).await?;
        self.refresh_at(EntityKind::User, Detail::Full, username, at)
            .await?;
        Ok(())
    }

    /// Populate a post at Full, or merge into the existing Full copy
    pub async fn upsert_post(&self, fetched: &Fetched<PostRecord>) -> Result<()> {
        let post = &fetched.record;
        if !self.is_cached(EntityKind::Post, Detail::Full, &post.id).await? {
            return self.populate_post(Detail::Full, fetched).await;
        }
        let at = self.expiry_instant();
        self.write_user(fetched.related.user(&post.author_id)?, Detail::Basic, at)
            .await?;
        self.write_post_scalars(post, Detail::Full, at).await?;
        self.merge_pages(EntityKind::Post, &post.id, fetched, at).await?;
        self.refresh_at(EntityKind::Post, Detail::Full, &post.id, at)
            .await?;
        Ok(())
    }

    async fn merge_pages<T>(
        &self,
        kind: EntityKind,
        id: &str,
        fetched: &Fetched<T>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        for (list, page) in &fetched.lists {
            for member in &page.members {
                self.cache_member(member, &fetched.related, at).await?;
            }
            self.splice_page(kind, id, *list, page).await?;
        }
        Ok(())
    }
}
