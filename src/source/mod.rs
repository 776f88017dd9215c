//! System-of-record interface consumed by the cache.
//!
//! Results are id-indexed arenas: a fetched record comes with ordered pages
//! of member references plus a `Related` arena holding every user and post
//! those members need. Nothing points at anything else directly.

pub mod fixture;

pub use self::fixture::{FixtureGraph, FixtureSource};

use crate::cache::keys::{EntityKind, ListField};
use crate::cache::resolver::Window;
use crate::error::{FeedCacheError, Result};
use crate::model::{PostRecord, RepostRecord, User};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};

/// A reference from a relationship list to one of its members
#[derive(Debug, Clone, PartialEq)]
pub enum Member {
    User(String),
    Post(String),
    Repost(RepostRecord),
}

impl Member {
    /// The id under which the member appears in a cached list
    pub fn list_id(&self) -> String {
        match self {
            Member::User(username) => username.clone(),
            Member::Post(id) => id.clone(),
            Member::Repost(repost) => repost.id().to_string(),
        }
    }
}

/// One page of a relationship list, in cache list order
#[derive(Debug, Clone, PartialEq)]
pub struct ListPage {
    pub offset: usize,
    pub members: Vec<Member>,
    /// No members exist beyond this page
    pub exhausted: bool,
}

impl ListPage {
    pub fn ids(&self) -> Vec<String> {
        self.members.iter().map(Member::list_id).collect()
    }
}

/// Records referenced by fetched members, keyed by id
#[derive(Debug, Clone, Default)]
pub struct Related {
    pub users: HashMap<String, User>,
    pub posts: HashMap<String, PostRecord>,
}

impl Related {
    pub fn user(&self, username: &str) -> Result<&User> {
        self.users
            .get(username)
            .ok_or_else(|| FeedCacheError::Source(format!("user '{}' missing from result", username)))
    }

    pub fn post(&self, id: &str) -> Result<&PostRecord> {
        self.posts
            .get(id)
            .ok_or_else(|| FeedCacheError::Source(format!("post '{}' missing from result", id)))
    }

    pub fn insert_user(&mut self, user: User) {
        self.users.insert(user.username.clone(), user);
    }

    pub fn insert_post(&mut self, post: PostRecord) {
        self.posts.insert(post.id.clone(), post);
    }

    pub fn merge(&mut self, other: Related) {
        self.users.extend(other.users);
        self.posts.extend(other.posts);
    }
}

/// A record with some of its relationship lists
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub record: T,
    pub lists: BTreeMap<ListField, ListPage>,
    pub related: Related,
}

impl<T> Fetched<T> {
    /// A record without any lists
    pub fn bare(record: T, related: Related) -> Self {
        Self {
            record,
            lists: BTreeMap::new(),
            related,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ListFetch {
    pub page: ListPage,
    pub related: Related,
}

/// Read access to the system-of-record.
///
/// `None` means the owner does not exist. Pages are returned in the same
/// order the cache keeps its lists in (newest first).
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch_user(
        &self,
        username: &str,
        lists: &[(ListField, Window)],
    ) -> Result<Option<Fetched<User>>>;

    async fn fetch_post(
        &self,
        id: &str,
        lists: &[(ListField, Window)],
    ) -> Result<Option<Fetched<PostRecord>>>;

    async fn fetch_list(
        &self,
        owner: EntityKind,
        id: &str,
        list: ListField,
        window: Window,
    ) -> Result<Option<ListFetch>>;
}
