//! Shared test fixtures.
//!
//! Graph:
//! - alice posts p1..p5 and follows bob; bob and carol follow alice
//! - bob posts b1, then reposts p1
//! - carol replies to p1 with c1 and likes p1; bob likes p2
//! - dave has no relationships

use crate::cache::FeedCache;
use crate::metrics::create_metrics;
use crate::model::{PostRecord, RepostRecord, User};
use crate::source::fixture::{Follow, Like};
use crate::source::{FixtureGraph, FixtureSource};
use crate::store::MemoryStore;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn user(username: &str, followers: i64, following: i64) -> User {
    User {
        username: username.to_string(),
        name: username.to_uppercase(),
        email: format!("{}@example.com", username),
        bio: format!("{} writes here", username),
        pfp_url: format!("https://cdn.example.com/{}.png", username),
        follower_count: followers,
        following_count: following,
        created_at: epoch(),
    }
}

pub fn post(id: &str, author: &str, minute: i64) -> PostRecord {
    let at = epoch() + Duration::minutes(minute);
    PostRecord {
        id: id.to_string(),
        body: format!("body of {}", id),
        author_id: author.to_string(),
        media: Vec::new(),
        posted_at: at,
        last_updated_at: at,
        like_count: 0,
        reply_count: 0,
        repost_count: 0,
        reply_to: None,
    }
}

pub fn graph() -> FixtureGraph {
    let mut posts: Vec<PostRecord> = (1..=5)
        .map(|i| post(&format!("p{}", i), "alice", i * 10))
        .collect();
    posts[0].like_count = 1;
    posts[0].reply_count = 1;
    posts[0].repost_count = 1;
    posts[0].media = vec!["https://cdn.example.com/p1.jpg".to_string()];
    posts[1].like_count = 1;
    posts.push(post("b1", "bob", 15));
    let mut reply = post("c1", "carol", 55);
    reply.reply_to = Some("p1".to_string());
    posts.push(reply);

    let follow = |follower: &str, followed: &str| Follow {
        follower: follower.to_string(),
        followed: followed.to_string(),
    };
    let like = |user: &str, post: &str| Like {
        user: user.to_string(),
        post: post.to_string(),
    };

    FixtureGraph {
        users: vec![
            user("alice", 2, 1),
            user("bob", 1, 1),
            user("carol", 0, 1),
            user("dave", 0, 0),
        ],
        posts,
        reposts: vec![RepostRecord {
            author_id: "bob".to_string(),
            post_id: "p1".to_string(),
            reposted_at: epoch() + Duration::minutes(60),
        }],
        follows: vec![
            follow("bob", "alice"),
            follow("carol", "alice"),
            follow("alice", "bob"),
        ],
        likes: vec![like("carol", "p1"), like("bob", "p2")],
    }
}

/// Engine over a fresh in-memory store with a one hour TTL
pub fn cache(graph: FixtureGraph) -> (FeedCache, Arc<MemoryStore>, Arc<FixtureSource>) {
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(FixtureSource::new(graph));
    let cache = FeedCache::new(
        store.clone(),
        source.clone(),
        create_metrics(),
        Duration::hours(1),
    );
    (cache, store, source)
}
