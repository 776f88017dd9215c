//! Records and typed read results.
//!
//! Records mirror what the system-of-record returns: a post names its
//! author by id. Typed results are what readers receive: a post carries its
//! author, a repost carries both its author and the reposted post.

use crate::cache::keys::{field, ListField, RepostId};
use crate::error::{FeedCacheError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub username: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub bio: String,
    #[serde(rename = "pfpURL", default)]
    pub pfp_url: String,
    #[serde(default)]
    pub follower_count: i64,
    #[serde(default)]
    pub following_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRecord {
    pub id: String,
    pub body: String,
    pub author_id: String,
    #[serde(default)]
    pub media: Vec<String>,
    pub posted_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    #[serde(default)]
    pub like_count: i64,
    #[serde(default)]
    pub reply_count: i64,
    #[serde(default)]
    pub repost_count: i64,
    #[serde(default)]
    pub reply_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepostRecord {
    pub author_id: String,
    pub post_id: String,
    pub reposted_at: DateTime<Utc>,
}

impl RepostRecord {
    pub fn id(&self) -> RepostId {
        RepostId::new(self.author_id.clone(), self.post_id.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub body: String,
    pub author: User,
    pub media: Vec<String>,
    pub posted_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub like_count: i64,
    pub reply_count: i64,
    pub repost_count: i64,
    pub reply_to: Option<String>,
}

impl Post {
    pub fn assemble(record: PostRecord, author: User) -> Self {
        Self {
            id: record.id,
            body: record.body,
            author,
            media: record.media,
            posted_at: record.posted_at,
            last_updated_at: record.last_updated_at,
            like_count: record.like_count,
            reply_count: record.reply_count,
            repost_count: record.repost_count,
            reply_to: record.reply_to,
        }
    }
}

impl From<Post> for PostRecord {
    fn from(post: Post) -> Self {
        Self {
            id: post.id,
            body: post.body,
            author_id: post.author.username,
            media: post.media,
            posted_at: post.posted_at,
            last_updated_at: post.last_updated_at,
            like_count: post.like_count,
            reply_count: post.reply_count,
            repost_count: post.repost_count,
            reply_to: post.reply_to,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Repost {
    pub author: User,
    pub post: Post,
    pub reposted_at: DateTime<Utc>,
}

/// A list member, or any entity read at Basic detail
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Entry {
    User(User),
    Post(Post),
    Repost(Repost),
}

impl Entry {
    pub fn id(&self) -> String {
        match self {
            Entry::User(u) => u.username.clone(),
            Entry::Post(p) => p.id.clone(),
            Entry::Repost(r) => RepostId::new(&r.author.username, &r.post.id).to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FullUser {
    pub user: User,
    pub list: ListField,
    pub members: Vec<Entry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FullPost {
    pub post: Post,
    /// Parent post when this post is a reply
    pub reply_to: Option<Post>,
    pub list: ListField,
    pub members: Vec<Entry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FullEntity {
    User(FullUser),
    Post(FullPost),
}

// === Scalar field encoding ===

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

/// Values fetched for a fixed field list; `None` when any is absent.
///
/// A partially expired family reads as a miss.
fn complete(values: Vec<Option<String>>) -> Option<Vec<String>> {
    values.into_iter().collect()
}

impl User {
    /// Scalar values in `EntityKind::User.scalar_fields()` order
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            (field::USERNAME, self.username.clone()),
            (field::NAME, self.name.clone()),
            (field::EMAIL, self.email.clone()),
            (field::BIO, self.bio.clone()),
            (field::PFP_URL, self.pfp_url.clone()),
            (field::FOLLOWER_COUNT, self.follower_count.to_string()),
            (field::FOLLOWING_COUNT, self.following_count.to_string()),
            (field::CREATED_AT, timestamp(&self.created_at)),
        ]
    }

    pub fn from_fields(values: Vec<Option<String>>) -> Result<Option<Self>> {
        let Some(v) = complete(values) else {
            return Ok(None);
        };
        let [username, name, email, bio, pfp_url, followers, following, created_at] =
            <[String; 8]>::try_from(v).map_err(|_| field_count_error("user"))?;
        Ok(Some(Self {
            username,
            name,
            email,
            bio,
            pfp_url,
            follower_count: followers.parse()?,
            following_count: following.parse()?,
            created_at: parse_timestamp(&created_at)?,
        }))
    }
}

impl PostRecord {
    /// Scalar values in `EntityKind::Post.scalar_fields()` order.
    /// Media is stored separately as a list.
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            (field::ID, self.id.clone()),
            (field::BODY, self.body.clone()),
            (field::AUTHOR, self.author_id.clone()),
            (field::POSTED_AT, timestamp(&self.posted_at)),
            (field::LAST_UPDATED_AT, timestamp(&self.last_updated_at)),
            (field::LIKE_COUNT, self.like_count.to_string()),
            (field::REPLY_COUNT, self.reply_count.to_string()),
            (field::REPOST_COUNT, self.repost_count.to_string()),
            (field::REPLY_TO, self.reply_to.clone().unwrap_or_default()),
        ]
    }

    pub fn from_fields(values: Vec<Option<String>>, media: Vec<String>) -> Result<Option<Self>> {
        let Some(v) = complete(values) else {
            return Ok(None);
        };
        let [id, body, author_id, posted_at, last_updated_at, likes, replies, reposts, reply_to] =
            <[String; 9]>::try_from(v).map_err(|_| field_count_error("post"))?;
        Ok(Some(Self {
            id,
            body,
            author_id,
            media,
            posted_at: parse_timestamp(&posted_at)?,
            last_updated_at: parse_timestamp(&last_updated_at)?,
            like_count: likes.parse()?,
            reply_count: replies.parse()?,
            repost_count: reposts.parse()?,
            reply_to: Some(reply_to).filter(|r| !r.is_empty()),
        }))
    }
}

impl RepostRecord {
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            (field::AUTHOR, self.author_id.clone()),
            (field::POST, self.post_id.clone()),
            (field::REPOSTED_AT, timestamp(&self.reposted_at)),
        ]
    }

    pub fn from_fields(values: Vec<Option<String>>) -> Result<Option<Self>> {
        let Some(v) = complete(values) else {
            return Ok(None);
        };
        let [author_id, post_id, reposted_at] =
            <[String; 3]>::try_from(v).map_err(|_| field_count_error("repost"))?;
        Ok(Some(Self {
            author_id,
            post_id,
            reposted_at: parse_timestamp(&reposted_at)?,
        }))
    }
}

fn field_count_error(kind: &str) -> FeedCacheError {
    FeedCacheError::Internal(format!("unexpected {} field count", kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::keys::EntityKind;
    use chrono::TimeZone;

    fn alice() -> User {
        User {
            username: "alice".to_string(),
            name: "Alice".to_string(),
            email: "alice@example.com".to_string(),
            bio: String::new(),
            pfp_url: "https://cdn.example.com/alice.png".to_string(),
            follower_count: 3,
            following_count: 1,
            created_at: Utc.with_ymd_and_hms(2023, 4, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_field_order_matches_key_schema() {
        let names: Vec<&str> = alice().to_fields().into_iter().map(|(f, _)| f).collect();
        assert_eq!(names, EntityKind::User.scalar_fields());
    }

    #[test]
    fn test_partial_family_is_a_miss() {
        let mut values: Vec<Option<String>> =
            alice().to_fields().into_iter().map(|(_, v)| Some(v)).collect();
        values[3] = None;
        assert!(User::from_fields(values).unwrap().is_none());
    }

    #[test]
    fn test_reply_to_empty_means_top_level() {
        let post = PostRecord {
            id: "1".to_string(),
            body: "hi".to_string(),
            author_id: "alice".to_string(),
            media: vec![],
            posted_at: Utc.with_ymd_and_hms(2023, 4, 1, 12, 0, 0).unwrap(),
            last_updated_at: Utc.with_ymd_and_hms(2023, 4, 1, 12, 0, 0).unwrap(),
            like_count: 0,
            reply_count: 0,
            repost_count: 0,
            reply_to: None,
        };
        let values = post.to_fields().into_iter().map(|(_, v)| Some(v)).collect();
        let decoded = PostRecord::from_fields(values, vec![]).unwrap().unwrap();
        assert_eq!(decoded, post);
    }

    #[test]
    fn test_corrupt_counter_is_reported() {
        let mut values: Vec<Option<String>> =
            alice().to_fields().into_iter().map(|(_, v)| Some(v)).collect();
        values[5] = Some("many".to_string());
        assert!(matches!(
            User::from_fields(values),
            Err(FeedCacheError::CorruptEncoding(_))
        ));
    }
}
