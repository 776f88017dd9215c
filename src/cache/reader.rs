//! Read path.
//!
//! Basic reads prefer the Full copy and fall back to the Basic one. Full
//! reads resolve the requested window against the cached list, fill a gap
//! from the system-of-record when there is one, and assemble every member
//! from its cached Basic copy. `None` always means "not in cache".

use super::keys::{self, field, Detail, EntityKind, ListField, RepostId};
use super::resolver::{resolve, Resolution, Window};
use super::FeedCache;
use crate::error::{FeedCacheError, Result};
use crate::model::{Entry, FullEntity, FullPost, FullUser, Post, PostRecord, Repost, RepostRecord, User};
use crate::source::ListPage;
use futures::future::try_join_all;
use tracing::{debug, warn};

impl FeedCache {
    async fn load_user_at(&self, detail: Detail, username: &str) -> Result<Option<User>> {
        let values = self
            .store
            .mget(&keys::scalar_keys(EntityKind::User, detail, username))
            .await?;
        User::from_fields(values)
    }

    pub(crate) async fn load_user(&self, username: &str) -> Result<Option<User>> {
        match self.load_user_at(Detail::Full, username).await? {
            Some(user) => Ok(Some(user)),
            None => self.load_user_at(Detail::Basic, username).await,
        }
    }

    async fn load_post_record_at(&self, detail: Detail, id: &str) -> Result<Option<PostRecord>> {
        let values = self
            .store
            .mget(&keys::scalar_keys(EntityKind::Post, detail, id))
            .await?;
        if values.iter().all(Option::is_none) {
            return Ok(None);
        }
        let media = self
            .store
            .lrange(&keys::key(EntityKind::Post, detail, id, field::MEDIA))
            .await?;
        PostRecord::from_fields(values, media)
    }

    pub(crate) async fn load_post_record(&self, id: &str) -> Result<Option<PostRecord>> {
        match self.load_post_record_at(Detail::Full, id).await? {
            Some(post) => Ok(Some(post)),
            None => self.load_post_record_at(Detail::Basic, id).await,
        }
    }

    async fn load_post(&self, id: &str) -> Result<Option<Post>> {
        let Some(record) = self.load_post_record(id).await? else {
            return Ok(None);
        };
        let Some(author) = self.load_user(&record.author_id).await? else {
            return Ok(None);
        };
        Ok(Some(Post::assemble(record, author)))
    }

    async fn load_repost(&self, id: &str) -> Result<Option<Repost>> {
        let values = self
            .store
            .mget(&keys::scalar_keys(EntityKind::Repost, Detail::Full, id))
            .await?;
        let Some(record) = RepostRecord::from_fields(values)? else {
            return Ok(None);
        };
        let (author, post) = futures::try_join!(
            self.load_user(&record.author_id),
            self.load_post(&record.post_id)
        )?;
        match (author, post) {
            (Some(author), Some(post)) => Ok(Some(Repost {
                author,
                post,
                reposted_at: record.reposted_at,
            })),
            _ => Ok(None),
        }
    }

    /// Read an entity at Basic detail, from whichever copy is cached
    pub async fn read_basic(&self, kind: EntityKind, id: &str) -> Result<Option<Entry>> {
        let entry = match kind {
            EntityKind::User => self.load_user(id).await?.map(Entry::User),
            EntityKind::Post => self.load_post(id).await?.map(Entry::Post),
            EntityKind::Repost => {
                // validate before hitting the store
                id.parse::<RepostId>()?;
                self.load_repost(id).await?.map(Entry::Repost)
            }
        };
        self.metrics
            .record_read(kind.as_str(), if entry.is_some() { "hit" } else { "miss" });
        Ok(entry)
    }

    /// Read an entity at Full detail with one page of one of its lists
    pub async fn read_full(
        &self,
        kind: EntityKind,
        id: &str,
        list: ListField,
        window: Window,
    ) -> Result<Option<FullEntity>> {
        list.check_owner(kind)?;
        let result = self.read_full_inner(kind, id, list, window).await?;
        self.metrics.record_read(
            &format!("{}_full", kind),
            if result.is_some() { "hit" } else { "miss" },
        );
        Ok(result)
    }

    async fn read_full_inner(
        &self,
        kind: EntityKind,
        id: &str,
        list: ListField,
        window: Window,
    ) -> Result<Option<FullEntity>> {
        if !self.is_cached(kind, Detail::Full, id).await? {
            debug!(kind = %kind, id = %id, "Full copy not cached");
            return Ok(None);
        }

        let Some(ids) = self.list_ids(kind, id, list, window).await? else {
            return Ok(None);
        };
        let members = try_join_all(
            ids.iter()
                .map(|member| self.load_member(list.member_kind(member), member)),
        )
        .await?;
        let Some(members) = members.into_iter().collect::<Option<Vec<Entry>>>() else {
            debug!(kind = %kind, id = %id, list = %list, "List member expired");
            return Ok(None);
        };

        match kind {
            EntityKind::User => {
                let Some(user) = self.load_user_at(Detail::Full, id).await? else {
                    return Ok(None);
                };
                Ok(Some(FullEntity::User(FullUser {
                    user,
                    list,
                    members,
                })))
            }
            EntityKind::Post => {
                let Some(record) = self.load_post_record_at(Detail::Full, id).await? else {
                    return Ok(None);
                };
                let Some(author) = self.load_user(&record.author_id).await? else {
                    return Ok(None);
                };
                let reply_to = match &record.reply_to {
                    Some(parent) => match self.load_post(parent).await? {
                        Some(parent) => Some(parent),
                        None => return Ok(None),
                    },
                    None => None,
                };
                Ok(Some(FullEntity::Post(FullPost {
                    post: Post::assemble(record, author),
                    reply_to,
                    list,
                    members,
                })))
            }
            EntityKind::Repost => Err(FeedCacheError::UnknownSelector(
                "reposts have no lists".to_string(),
            )),
        }
    }

    async fn load_member(&self, kind: EntityKind, id: &str) -> Result<Option<Entry>> {
        Ok(match kind {
            EntityKind::User => self.load_user(id).await?.map(Entry::User),
            EntityKind::Post => self.load_post(id).await?.map(Entry::Post),
            EntityKind::Repost => self.load_repost(id).await?.map(Entry::Repost),
        })
    }

    /// Member ids of a window, filling any gap from the system-of-record.
    /// `None` when the owner no longer exists there.
    async fn list_ids(
        &self,
        kind: EntityKind,
        id: &str,
        list: ListField,
        window: Window,
    ) -> Result<Option<Vec<String>>> {
        let slots = self.load_list(kind, id, list).await?;
        match resolve(&slots, window) {
            Resolution::Hit(ids) => Ok(Some(ids)),
            Resolution::Partial(hit) => {
                debug!(
                    kind = %kind,
                    id = %id,
                    list = %list,
                    first_stub = hit.first_stub,
                    last_stub = hit.last_stub,
                    "Partial list hit"
                );
                let Some(fetched) = self
                    .fill_gap(kind, id, list, hit.fetch_window(window))
                    .await?
                else {
                    return Ok(None);
                };
                let mut ids = hit.prefix;
                ids.extend(fetched);
                ids.extend(hit.suffix);
                Ok(Some(ids))
            }
            Resolution::Miss => self.fill_gap(kind, id, list, window).await,
        }
    }

    /// Fetch a window from the system-of-record, cache its members and
    /// splice it into the owner's list
    async fn fill_gap(
        &self,
        kind: EntityKind,
        id: &str,
        list: ListField,
        window: Window,
    ) -> Result<Option<Vec<String>>> {
        self.metrics.record_gap_fetch(list.key_name());
        let Some(fetch) = self.source.fetch_list(kind, id, list, window).await? else {
            warn!(kind = %kind, id = %id, "Owner vanished from the system-of-record");
            return Ok(None);
        };

        let at = self.expiry_instant();
        for member in &fetch.page.members {
            self.cache_member(member, &fetch.related, at).await?;
        }

        let returned = fetch.page.members.len();
        let page = ListPage {
            offset: window.offset,
            exhausted: fetch.page.exhausted || window.count.map_or(true, |c| returned < c),
            members: fetch.page.members,
        };
        self.splice_page(kind, id, list, &page).await?;
        Ok(Some(page.ids()))
    }

    /// Read a user's page, populating the cache from the system-of-record
    /// on a miss
    pub async fn read_through_user(
        &self,
        username: &str,
        list: ListField,
        window: Window,
    ) -> Result<Option<FullUser>> {
        list.check_owner(EntityKind::User)?;
        if let Some(FullEntity::User(user)) =
            self.read_full(EntityKind::User, username, list, window).await?
        {
            return Ok(Some(user));
        }
        let Some(fetched) = self.source.fetch_user(username, &[(list, window)]).await? else {
            return Ok(None);
        };
        self.upsert_user(&fetched).await?;
        match self.read_full(EntityKind::User, username, list, window).await? {
            Some(FullEntity::User(user)) => Ok(Some(user)),
            _ => Ok(None),
        }
    }

    /// Read a post's page, populating the cache from the system-of-record
    /// on a miss
    pub async fn read_through_post(
        &self,
        id: &str,
        list: ListField,
        window: Window,
    ) -> Result<Option<FullPost>> {
        list.check_owner(EntityKind::Post)?;
        if let Some(FullEntity::Post(post)) =
            self.read_full(EntityKind::Post, id, list, window).await?
        {
            return Ok(Some(post));
        }
        let Some(fetched) = self.source.fetch_post(id, &[(list, window)]).await? else {
            return Ok(None);
        };
        self.upsert_post(&fetched).await?;
        match self.read_full(EntityKind::Post, id, list, window).await? {
            Some(FullEntity::Post(post)) => Ok(Some(post)),
            _ => Ok(None),
        }
    }
}
