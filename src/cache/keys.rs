//! Flat key schema for cached entities.
//!
//! Every cached value lives under `kind:detail:id:field`, e.g.
//! `user:full:alice:bio` or `post:basic:42:likeCount`. All keys of one
//! entity at one detail level form a TTL family and are re-armed together.

use crate::error::{FeedCacheError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Scalar field names shared by the writer, the reader and the propagator.
pub mod field {
    pub const USERNAME: &str = "username";
    pub const NAME: &str = "name";
    pub const EMAIL: &str = "email";
    pub const BIO: &str = "bio";
    pub const PFP_URL: &str = "pfpURL";
    pub const FOLLOWER_COUNT: &str = "followerCount";
    pub const FOLLOWING_COUNT: &str = "followingCount";
    pub const CREATED_AT: &str = "createdAt";

    pub const ID: &str = "id";
    pub const BODY: &str = "body";
    pub const AUTHOR: &str = "author";
    pub const POSTED_AT: &str = "postedAt";
    pub const LAST_UPDATED_AT: &str = "lastUpdatedAt";
    pub const LIKE_COUNT: &str = "likeCount";
    pub const REPLY_COUNT: &str = "replyCount";
    pub const REPOST_COUNT: &str = "repostCount";
    pub const REPLY_TO: &str = "replyTo";
    /// Ordered media URLs of a post; a list key in the scalar family
    pub const MEDIA: &str = "media";

    pub const POST: &str = "post";
    pub const REPOSTED_AT: &str = "repostedAt";
}

const USER_FIELDS: &[&str] = &[
    field::USERNAME,
    field::NAME,
    field::EMAIL,
    field::BIO,
    field::PFP_URL,
    field::FOLLOWER_COUNT,
    field::FOLLOWING_COUNT,
    field::CREATED_AT,
];

const POST_FIELDS: &[&str] = &[
    field::ID,
    field::BODY,
    field::AUTHOR,
    field::POSTED_AT,
    field::LAST_UPDATED_AT,
    field::LIKE_COUNT,
    field::REPLY_COUNT,
    field::REPOST_COUNT,
    field::REPLY_TO,
];

const REPOST_FIELDS: &[&str] = &[field::AUTHOR, field::POST, field::REPOSTED_AT];

/// Kind of a cached entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    User,
    Post,
    Repost,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Post => "post",
            EntityKind::Repost => "repost",
        }
    }

    /// Scalar fields stored for this kind, in a fixed order
    pub fn scalar_fields(&self) -> &'static [&'static str] {
        match self {
            EntityKind::User => USER_FIELDS,
            EntityKind::Post => POST_FIELDS,
            EntityKind::Repost => REPOST_FIELDS,
        }
    }

    /// The scalar whose existence marks the entity as cached
    pub fn presence_field(&self) -> &'static str {
        match self {
            EntityKind::User => field::USERNAME,
            EntityKind::Post => field::ID,
            EntityKind::Repost => field::AUTHOR,
        }
    }

    /// Relationship lists carried at Full detail
    pub fn list_fields(&self) -> &'static [ListField] {
        match self {
            EntityKind::User => &[
                ListField::Followers,
                ListField::Following,
                ListField::Posts,
                ListField::Reposts,
                ListField::Feed,
                ListField::RepostedPosts,
                ListField::LikedPosts,
            ],
            EntityKind::Post => &[ListField::LikedBy, ListField::RepostedBy, ListField::Replies],
            EntityKind::Repost => &[],
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = FeedCacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(EntityKind::User),
            "post" => Ok(EntityKind::Post),
            "repost" => Ok(EntityKind::Repost),
            other => Err(FeedCacheError::UnknownSelector(format!(
                "entity kind '{}'",
                other
            ))),
        }
    }
}

/// Detail level of a cached copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Detail {
    Basic,
    Full,
}

impl Detail {
    pub fn as_str(&self) -> &'static str {
        match self {
            Detail::Basic => "basic",
            Detail::Full => "full",
        }
    }
}

impl fmt::Display for Detail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Detail {
    type Err = FeedCacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "basic" => Ok(Detail::Basic),
            "full" => Ok(Detail::Full),
            other => Err(FeedCacheError::UnknownSelector(format!("detail '{}'", other))),
        }
    }
}

/// A relationship list of a user or a post
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ListField {
    Followers,
    Following,
    Posts,
    Reposts,
    /// A user's posts and reposts merged by time
    Feed,
    RepostedPosts,
    LikedPosts,
    LikedBy,
    RepostedBy,
    Replies,
}

impl ListField {
    pub fn key_name(&self) -> &'static str {
        match self {
            ListField::Followers => "followers",
            ListField::Following => "following",
            ListField::Posts => "posts",
            ListField::Reposts => "reposts",
            ListField::Feed => "feed",
            ListField::RepostedPosts => "repostedPosts",
            ListField::LikedPosts => "likedPosts",
            ListField::LikedBy => "likedBy",
            ListField::RepostedBy => "repostedBy",
            ListField::Replies => "replies",
        }
    }

    /// Kind of the entity that owns this list
    pub fn owner(&self) -> EntityKind {
        match self {
            ListField::LikedBy | ListField::RepostedBy | ListField::Replies => EntityKind::Post,
            _ => EntityKind::User,
        }
    }

    /// Kind of the member stored under `id` in this list.
    ///
    /// The feed mixes posts and reposts; repost ids are recognised by
    /// their bracket syntax.
    pub fn member_kind(&self, id: &str) -> EntityKind {
        match self {
            ListField::Followers
            | ListField::Following
            | ListField::LikedBy
            | ListField::RepostedBy => EntityKind::User,
            ListField::Reposts => EntityKind::Repost,
            ListField::Feed if RepostId::is_repost_id(id) => EntityKind::Repost,
            _ => EntityKind::Post,
        }
    }

    /// Reject a selector that does not belong to `kind`
    pub fn check_owner(&self, kind: EntityKind) -> Result<()> {
        if self.owner() == kind {
            Ok(())
        } else {
            Err(FeedCacheError::UnknownSelector(format!(
                "list '{}' is not a {} list",
                self.key_name(),
                kind
            )))
        }
    }
}

impl fmt::Display for ListField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key_name())
    }
}

impl FromStr for ListField {
    type Err = FeedCacheError;

    fn from_str(s: &str) -> Result<Self> {
        let all = EntityKind::User
            .list_fields()
            .iter()
            .chain(EntityKind::Post.list_fields());
        for candidate in all {
            if candidate.key_name() == s {
                return Ok(*candidate);
            }
        }
        Err(FeedCacheError::UnknownSelector(format!("list '{}'", s)))
    }
}

/// Synthetic identity of a repost: `Repost(<author>, <post>)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepostId {
    pub author: String,
    pub post: String,
}

impl RepostId {
    const PREFIX: &'static str = "Repost(";
    const SUFFIX: &'static str = ")";
    const SEPARATOR: &'static str = ", ";

    pub fn new(author: impl Into<String>, post: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            post: post.into(),
        }
    }

    pub fn is_repost_id(id: &str) -> bool {
        id.starts_with(Self::PREFIX) && id.ends_with(Self::SUFFIX)
    }
}

impl fmt::Display for RepostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}{}",
            Self::PREFIX,
            self.author,
            Self::SEPARATOR,
            self.post,
            Self::SUFFIX
        )
    }
}

impl FromStr for RepostId {
    type Err = FeedCacheError;

    fn from_str(s: &str) -> Result<Self> {
        let inner = s
            .strip_prefix(Self::PREFIX)
            .and_then(|rest| rest.strip_suffix(Self::SUFFIX))
            .ok_or_else(|| FeedCacheError::CorruptEncoding(format!("repost id '{}'", s)))?;
        // Post ids never contain the separator; usernames might.
        let (author, post) = inner
            .rsplit_once(Self::SEPARATOR)
            .ok_or_else(|| FeedCacheError::CorruptEncoding(format!("repost id '{}'", s)))?;
        Ok(Self::new(author, post))
    }
}

/// Build the store key for one field of one entity.
///
/// Reposts only exist at Full detail, so their detail is normalised.
pub fn key(kind: EntityKind, detail: Detail, id: &str, field: &str) -> String {
    let detail = match kind {
        EntityKind::Repost => Detail::Full,
        _ => detail,
    };
    format!("{}:{}:{}:{}", kind, detail, id, field)
}

pub fn list_key(kind: EntityKind, id: &str, list: ListField) -> String {
    key(kind, Detail::Full, id, list.key_name())
}

pub fn presence_key(kind: EntityKind, detail: Detail, id: &str) -> String {
    key(kind, detail, id, kind.presence_field())
}

/// String-valued scalar keys, in `scalar_fields` order
pub fn scalar_keys(kind: EntityKind, detail: Detail, id: &str) -> Vec<String> {
    kind.scalar_fields()
        .iter()
        .map(|f| key(kind, detail, id, f))
        .collect()
}

/// Scalar keys plus the post media list
pub fn scalar_family(kind: EntityKind, detail: Detail, id: &str) -> Vec<String> {
    let mut keys = scalar_keys(kind, detail, id);
    if kind == EntityKind::Post {
        keys.push(key(kind, detail, id, field::MEDIA));
    }
    keys
}

/// Every key of one entity at one detail level
pub fn family(kind: EntityKind, detail: Detail, id: &str) -> Vec<String> {
    let mut keys = scalar_family(kind, detail, id);
    if detail == Detail::Full {
        keys.extend(kind.list_fields().iter().map(|l| list_key(kind, id, *l)));
    }
    keys
}

/// Keys of a family that hold lists rather than strings
pub fn is_list_key(kind: EntityKind, key: &str) -> bool {
    let field = key.rsplit(':').next().unwrap_or_default();
    field == field::MEDIA || kind.list_fields().iter().any(|l| l.key_name() == field)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_format() {
        assert_eq!(
            key(EntityKind::User, Detail::Full, "alice", field::BIO),
            "user:full:alice:bio"
        );
        assert_eq!(
            key(EntityKind::Post, Detail::Basic, "42", field::LIKE_COUNT),
            "post:basic:42:likeCount"
        );
    }

    #[test]
    fn test_repost_keys_are_always_full() {
        let id = RepostId::new("alice", "42").to_string();
        assert_eq!(
            key(EntityKind::Repost, Detail::Basic, &id, field::AUTHOR),
            "repost:full:Repost(alice, 42):author"
        );
    }

    #[test]
    fn test_repost_id_parse() {
        let id: RepostId = "Repost(bob, 7)".parse().unwrap();
        assert_eq!(id, RepostId::new("bob", "7"));

        // Separator inside the username survives because the split is from the right
        let odd: RepostId = "Repost(a, b, 9)".parse().unwrap();
        assert_eq!(odd.author, "a, b");
        assert_eq!(odd.post, "9");

        assert!("Repost(nope)".parse::<RepostId>().is_err());
        assert!("42".parse::<RepostId>().is_err());
    }

    #[test]
    fn test_feed_member_kinds() {
        assert_eq!(ListField::Feed.member_kind("42"), EntityKind::Post);
        assert_eq!(
            ListField::Feed.member_kind("Repost(bob, 42)"),
            EntityKind::Repost
        );
        assert_eq!(ListField::LikedBy.member_kind("bob"), EntityKind::User);
    }

    #[test]
    fn test_list_selector_parsing() {
        assert_eq!(
            "repostedPosts".parse::<ListField>().unwrap(),
            ListField::RepostedPosts
        );
        assert!(matches!(
            "friends".parse::<ListField>(),
            Err(FeedCacheError::UnknownSelector(_))
        ));
        assert!(ListField::Replies.check_owner(EntityKind::User).is_err());
        assert!(ListField::Replies.check_owner(EntityKind::Post).is_ok());
    }

    #[test]
    fn test_family_contents() {
        let basic = family(EntityKind::Post, Detail::Basic, "1");
        assert_eq!(basic.len(), POST_FIELDS.len() + 1);
        assert!(basic.contains(&"post:basic:1:media".to_string()));

        let full = family(EntityKind::User, Detail::Full, "alice");
        assert_eq!(full.len(), USER_FIELDS.len() + 7);
        assert!(is_list_key(EntityKind::User, "user:full:alice:feed"));
        assert!(!is_list_key(EntityKind::User, "user:full:alice:bio"));
    }
}
