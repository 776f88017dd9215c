//! In-memory record source over a static social graph.
//!
//! The graph is loaded from JSON (or built in code) and answers the same
//! queries the relational system-of-record would: user and post lookups
//! with paged relationship lists, newest first.

use super::{Fetched, ListFetch, ListPage, Member, RecordSource, Related};
use crate::cache::keys::{EntityKind, ListField};
use crate::cache::resolver::Window;
use crate::error::{FeedCacheError, Result};
use crate::model::{PostRecord, RepostRecord, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Clone, Deserialize)]
pub struct Follow {
    pub follower: String,
    pub followed: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Like {
    pub user: String,
    pub post: String,
}

/// A whole social graph. Follows and likes are listed oldest first.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FixtureGraph {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub posts: Vec<PostRecord>,
    #[serde(default)]
    pub reposts: Vec<RepostRecord>,
    #[serde(default)]
    pub follows: Vec<Follow>,
    #[serde(default)]
    pub likes: Vec<Like>,
}

fn newest_first<T>(mut items: Vec<(DateTime<Utc>, T)>) -> Vec<T> {
    items.sort_by(|a, b| b.0.cmp(&a.0));
    items.into_iter().map(|(_, item)| item).collect()
}

fn page(all: Vec<Member>, window: Window) -> ListPage {
    let start = window.offset.min(all.len());
    let end = window
        .count
        .map_or(all.len(), |count| (start + count).min(all.len()));
    ListPage {
        offset: window.offset,
        exhausted: end >= all.len(),
        members: all[start..end].to_vec(),
    }
}

impl FixtureGraph {
    pub fn user(&self, username: &str) -> Option<&User> {
        self.users.iter().find(|u| u.username == username)
    }

    pub fn post(&self, id: &str) -> Option<&PostRecord> {
        self.posts.iter().find(|p| p.id == id)
    }

    /// Every member of a relationship list, newest first.
    /// `None` when the owner does not exist.
    pub fn list_members(&self, owner: EntityKind, id: &str, list: ListField) -> Option<Vec<Member>> {
        match owner {
            EntityKind::User => {
                self.user(id)?;
            }
            EntityKind::Post => {
                self.post(id)?;
            }
            EntityKind::Repost => return None,
        }

        let members = match list {
            ListField::Followers => self
                .follows
                .iter()
                .rev()
                .filter(|f| f.followed == id)
                .map(|f| Member::User(f.follower.clone()))
                .collect(),
            ListField::Following => self
                .follows
                .iter()
                .rev()
                .filter(|f| f.follower == id)
                .map(|f| Member::User(f.followed.clone()))
                .collect(),
            ListField::Posts => newest_first(
                self.posts
                    .iter()
                    .filter(|p| p.author_id == id)
                    .map(|p| (p.posted_at, Member::Post(p.id.clone())))
                    .collect(),
            ),
            ListField::Reposts => newest_first(
                self.reposts
                    .iter()
                    .filter(|r| r.author_id == id)
                    .map(|r| (r.reposted_at, Member::Repost(r.clone())))
                    .collect(),
            ),
            ListField::Feed => newest_first(
                self.posts
                    .iter()
                    .filter(|p| p.author_id == id)
                    .map(|p| (p.posted_at, Member::Post(p.id.clone())))
                    .chain(
                        self.reposts
                            .iter()
                            .filter(|r| r.author_id == id)
                            .map(|r| (r.reposted_at, Member::Repost(r.clone()))),
                    )
                    .collect(),
            ),
            ListField::RepostedPosts => newest_first(
                self.reposts
                    .iter()
                    .filter(|r| r.author_id == id)
                    .map(|r| (r.reposted_at, Member::Post(r.post_id.clone())))
                    .collect(),
            ),
            ListField::LikedPosts => self
                .likes
                .iter()
                .rev()
                .filter(|l| l.user == id)
                .map(|l| Member::Post(l.post.clone()))
                .collect(),
            ListField::LikedBy => self
                .likes
                .iter()
                .rev()
                .filter(|l| l.post == id)
                .map(|l| Member::User(l.user.clone()))
                .collect(),
            ListField::RepostedBy => newest_first(
                self.reposts
                    .iter()
                    .filter(|r| r.post_id == id)
                    .map(|r| (r.reposted_at, Member::User(r.author_id.clone())))
                    .collect(),
            ),
            ListField::Replies => newest_first(
                self.posts
                    .iter()
                    .filter(|p| p.reply_to.as_deref() == Some(id))
                    .map(|p| (p.posted_at, Member::Post(p.id.clone())))
                    .collect(),
            ),
        };
        Some(members)
    }

    fn relate_user(&self, related: &mut Related, username: &str) -> Result<()> {
        if related.users.contains_key(username) {
            return Ok(());
        }
        let user = self
            .user(username)
            .ok_or_else(|| FeedCacheError::Source(format!("dangling user '{}'", username)))?;
        related.insert_user(user.clone());
        Ok(())
    }

    fn relate_post(&self, related: &mut Related, id: &str) -> Result<()> {
        if related.posts.contains_key(id) {
            return Ok(());
        }
        let post = self
            .post(id)
            .ok_or_else(|| FeedCacheError::Source(format!("dangling post '{}'", id)))?;
        self.relate_user(related, &post.author_id)?;
        related.insert_post(post.clone());
        Ok(())
    }

    /// Arena holding everything `members` reference
    pub fn related(&self, members: &[Member]) -> Result<Related> {
        let mut related = Related::default();
        for member in members {
            match member {
                Member::User(username) => self.relate_user(&mut related, username)?,
                Member::Post(id) => self.relate_post(&mut related, id)?,
                Member::Repost(repost) => {
                    self.relate_user(&mut related, &repost.author_id)?;
                    self.relate_post(&mut related, &repost.post_id)?;
                }
            }
        }
        Ok(related)
    }

    fn pages(
        &self,
        owner: EntityKind,
        id: &str,
        lists: &[(ListField, Window)],
        related: &mut Related,
    ) -> Result<BTreeMap<ListField, ListPage>> {
        let mut pages = BTreeMap::new();
        for (list, window) in lists {
            list.check_owner(owner)?;
            let all = self.list_members(owner, id, *list).unwrap_or_default();
            let page = page(all, *window);
            related.merge(self.related(&page.members)?);
            pages.insert(*list, page);
        }
        Ok(pages)
    }
}

/// `RecordSource` over a `FixtureGraph`
#[derive(Debug, Default)]
pub struct FixtureSource {
    graph: RwLock<FixtureGraph>,
    fetches: AtomicUsize,
}

impl FixtureSource {
    pub fn new(graph: FixtureGraph) -> Self {
        Self {
            graph: RwLock::new(graph),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Number of fetches served so far
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FeedCacheError::Source(format!("{}: {}", path.display(), e)))?;
        let graph: FixtureGraph = serde_json::from_str(&content)?;
        info!(
            path = %path.display(),
            users = graph.users.len(),
            posts = graph.posts.len(),
            "Loaded fixture graph"
        );
        Ok(Self::new(graph))
    }

    /// Apply a write to the graph, as the API layer would before invoking
    /// a mutation hook
    pub async fn modify<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut FixtureGraph) -> R,
    {
        let mut graph = self.graph.write().await;
        f(&mut graph)
    }
}

#[async_trait]
impl RecordSource for FixtureSource {
    async fn fetch_user(
        &self,
        username: &str,
        lists: &[(ListField, Window)],
    ) -> Result<Option<Fetched<User>>> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let graph = self.graph.read().await;
        let Some(user) = graph.user(username).cloned() else {
            return Ok(None);
        };
        let mut related = Related::default();
        let lists = graph.pages(EntityKind::User, username, lists, &mut related)?;
        debug!(username = %username, lists = lists.len(), "Fixture user fetch");
        Ok(Some(Fetched {
            record: user,
            lists,
            related,
        }))
    }

    async fn fetch_post(
        &self,
        id: &str,
        lists: &[(ListField, Window)],
    ) -> Result<Option<Fetched<PostRecord>>> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let graph = self.graph.read().await;
        let Some(post) = graph.post(id).cloned() else {
            return Ok(None);
        };
        let mut related = Related::default();
        graph.relate_user(&mut related, &post.author_id)?;
        if let Some(parent) = &post.reply_to {
            graph.relate_post(&mut related, parent)?;
        }
        let lists = graph.pages(EntityKind::Post, id, lists, &mut related)?;
        debug!(post = %id, lists = lists.len(), "Fixture post fetch");
        Ok(Some(Fetched {
            record: post,
            lists,
            related,
        }))
    }

    async fn fetch_list(
        &self,
        owner: EntityKind,
        id: &str,
        list: ListField,
        window: Window,
    ) -> Result<Option<ListFetch>> {
        list.check_owner(owner)?;
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let graph = self.graph.read().await;
        let Some(all) = graph.list_members(owner, id, list) else {
            return Ok(None);
        };
        let page = page(all, window);
        let related = graph.related(&page.members)?;
        debug!(
            owner = %owner,
            id = %id,
            list = %list,
            offset = window.offset,
            returned = page.members.len(),
            "Fixture list fetch"
        );
        Ok(Some(ListFetch { page, related }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit;

    #[tokio::test]
    async fn test_pages_are_newest_first_and_windowed() {
        let source = FixtureSource::new(testkit::graph());
        let fetch = source
            .fetch_list(EntityKind::User, "alice", ListField::Posts, Window::new(1, Some(2)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetch.page.ids(), vec!["p4", "p3"]);
        assert!(!fetch.page.exhausted);
        assert!(fetch.related.posts.contains_key("p4"));
        assert!(fetch.related.users.contains_key("alice"));
    }

    #[tokio::test]
    async fn test_feed_merges_posts_and_reposts() {
        let source = FixtureSource::new(testkit::graph());
        let fetch = source
            .fetch_list(EntityKind::User, "bob", ListField::Feed, Window::all())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetch.page.ids(), vec!["Repost(bob, p1)", "b1"]);
        assert!(fetch.page.exhausted);
        // reposted post and its author come along
        assert!(fetch.related.posts.contains_key("p1"));
        assert!(fetch.related.users.contains_key("alice"));
    }

    #[tokio::test]
    async fn test_unknown_owner_is_none() {
        let source = FixtureSource::new(testkit::graph());
        assert!(source.fetch_user("nobody", &[]).await.unwrap().is_none());
        assert!(source
            .fetch_list(EntityKind::Post, "nope", ListField::Replies, Window::all())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_list_of_wrong_owner_is_rejected() {
        let source = FixtureSource::new(testkit::graph());
        assert!(matches!(
            source
                .fetch_list(EntityKind::User, "alice", ListField::Replies, Window::all())
                .await,
            Err(FeedCacheError::UnknownSelector(_))
        ));
    }

    #[test]
    fn test_graph_deserializes_from_json() {
        let json = r#"{
            "users": [{"username": "zed", "name": "Zed", "email": "z@example.com",
                       "createdAt": "2024-01-01T00:00:00Z"}],
            "follows": [{"follower": "zed", "followed": "zed"}]
        }"#;
        let graph: FixtureGraph = serde_json::from_str(json).unwrap();
        assert_eq!(graph.users[0].follower_count, 0);
        assert_eq!(graph.follows.len(), 1);
        assert!(graph.posts.is_empty());
    }
}
