//! Cache engine self-test.
//!
//! Runs a scripted scenario against the configured store using synthetic
//! ids and a built-in record graph, then evicts everything it wrote. It
//! exercises the paths that matter when a deployment points at a new
//! store: read-through population, cache hits, gap filling, mutation
//! idempotence and deletion.
//!
//! Checks:
//! 1. **read_through**: a cold read populates and returns the first page
//! 2. **cache_hit**: repeating the read does not consult the source
//! 3. **gap_fill**: a page past the cached block is fetched and spliced
//! 4. **full_list**: the spliced list is served whole without fetching
//! 5. **like_idempotent**: liking twice counts once
//! 6. **delete_post**: a deleted post disappears from its author's lists

use super::keys::{EntityKind, ListField};
use super::resolver::Window;
use super::FeedCache;
use crate::error::Result;
use crate::metrics::SharedMetrics;
use crate::model::{Entry, FullEntity, PostRecord, User};
use crate::source::fixture::Like;
use crate::source::{FixtureGraph, FixtureSource, RecordSource};
use crate::store::SharedStore;
use chrono::{Duration, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Result of running the self-test scenario
#[derive(Debug)]
pub struct SelfTestResult {
    /// Total number of checks run
    pub total_assertions: usize,
    /// Number of passing checks
    pub passed: usize,
    /// Number of failing checks
    pub failed: usize,
    /// Detailed failure reports
    pub failures: Vec<SelfTestFailure>,
    /// Duration of the run
    pub duration_ms: u64,
}

impl SelfTestResult {
    pub fn is_pass(&self) -> bool {
        self.failed == 0
    }
}

impl fmt::Display for SelfTestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_pass() {
            write!(
                f,
                "SELF-TEST PASSED: {}/{} checks passed in {}ms",
                self.passed, self.total_assertions, self.duration_ms
            )
        } else {
            write!(
                f,
                "SELF-TEST FAILED: {}/{} checks failed ({} passed) in {}ms",
                self.failed, self.total_assertions, self.passed, self.duration_ms
            )
        }
    }
}

/// A single failed check
#[derive(Debug)]
pub struct SelfTestFailure {
    pub check: &'static str,
    pub expected: String,
    pub actual: String,
}

impl fmt::Display for SelfTestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] expected=\"{}\" actual=\"{}\"",
            self.check, self.expected, self.actual
        )
    }
}

#[derive(Default)]
struct Checks {
    total: usize,
    passed: usize,
    failures: Vec<SelfTestFailure>,
}

impl Checks {
    fn expect_eq<T: PartialEq + fmt::Debug>(&mut self, check: &'static str, expected: T, actual: T) {
        self.total += 1;
        if expected == actual {
            self.passed += 1;
        } else {
            self.failures.push(SelfTestFailure {
                check,
                expected: format!("{:?}", expected),
                actual: format!("{:?}", actual),
            });
        }
    }

    fn error(&mut self, check: &'static str, err: impl fmt::Display) {
        self.total += 1;
        self.failures.push(SelfTestFailure {
            check,
            expected: "no error".into(),
            actual: format!("error: {}", err),
        });
    }
}

/// Synthetic ids, unique per run
struct Ids {
    author: String,
    liker: String,
    posts: Vec<String>,
}

impl Ids {
    fn new() -> Self {
        let run = format!("selftest-{}", Utc::now().timestamp_millis());
        Self {
            author: format!("{}-author", run),
            liker: format!("{}-liker", run),
            posts: (0..4).map(|i| format!("{}-post{}", run, i)).collect(),
        }
    }

    /// Posts newest first, as lists order them
    fn newest(&self, range: std::ops::Range<usize>) -> Vec<String> {
        self.posts.iter().rev().cloned().collect::<Vec<_>>()[range].to_vec()
    }
}

fn graph(ids: &Ids) -> FixtureGraph {
    let epoch = Utc::now() - Duration::days(1);
    let user = |username: &str| User {
        username: username.to_string(),
        name: username.to_string(),
        email: format!("{}@selftest.invalid", username),
        bio: String::new(),
        pfp_url: String::new(),
        follower_count: 0,
        following_count: 0,
        created_at: epoch,
    };
    let posts = ids
        .posts
        .iter()
        .enumerate()
        .map(|(i, id)| PostRecord {
            id: id.clone(),
            body: format!("self-test post {}", i),
            author_id: ids.author.clone(),
            media: Vec::new(),
            posted_at: epoch + Duration::minutes(i as i64),
            last_updated_at: epoch + Duration::minutes(i as i64),
            like_count: 0,
            reply_count: 0,
            repost_count: 0,
            reply_to: None,
        })
        .collect();
    FixtureGraph {
        users: vec![user(&ids.author), user(&ids.liker)],
        posts,
        ..FixtureGraph::default()
    }
}

fn member_ids(entity: Option<FullEntity>) -> Vec<String> {
    match entity {
        Some(FullEntity::User(user)) => user.members.iter().map(Entry::id).collect(),
        Some(FullEntity::Post(post)) => post.members.iter().map(Entry::id).collect(),
        None => Vec::new(),
    }
}

async fn scenario(cache: &FeedCache, source: &FixtureSource, ids: &Ids, checks: &mut Checks) -> Result<()> {
    let author = ids.author.as_str();

    // 1. cold read
    let first = cache
        .read_through_user(author, ListField::Posts, Window::new(0, Some(2)))
        .await?;
    let first: Vec<String> = first
        .map(|u| u.members.iter().map(Entry::id).collect())
        .unwrap_or_default();
    checks.expect_eq("read_through", ids.newest(0..2), first);

    // 2. warm read
    let fetches = source.fetch_count();
    let again = cache
        .read_full(EntityKind::User, author, ListField::Posts, Window::new(0, Some(2)))
        .await?;
    checks.expect_eq("cache_hit", ids.newest(0..2), member_ids(again));
    checks.expect_eq("cache_hit", fetches, source.fetch_count());

    // 3. page behind the open stub
    let gap = cache
        .read_full(EntityKind::User, author, ListField::Posts, Window::new(2, Some(2)))
        .await?;
    checks.expect_eq("gap_fill", ids.newest(2..4), member_ids(gap));

    // 4. the whole list is now known
    let fetches = source.fetch_count();
    let whole = cache
        .read_full(EntityKind::User, author, ListField::Posts, Window::all())
        .await?;
    checks.expect_eq("full_list", ids.newest(0..4), member_ids(whole));
    checks.expect_eq("full_list", fetches, source.fetch_count());

    // 5. like twice
    let liked = ids.posts[0].clone();
    source
        .modify(|g| {
            g.likes.push(Like {
                user: ids.liker.clone(),
                post: liked.clone(),
            });
            if let Some(post) = g.posts.iter_mut().find(|p| p.id == liked) {
                post.like_count = 1;
            }
        })
        .await;
    let liker = source
        .fetch_user(&ids.liker, &[])
        .await?
        .map(|f| f.record);
    let post = source.fetch_post(&liked, &[]).await?;
    if let (Some(liker), Some(post)) = (liker, post) {
        cache.like(&liker, &post).await?;
        cache.like(&liker, &post).await?;
    }
    let like_count = match cache.read_basic(EntityKind::Post, &liked).await? {
        Some(Entry::Post(post)) => Some(post.like_count),
        _ => None,
    };
    checks.expect_eq("like_idempotent", Some(1), like_count);

    // 6. delete
    if let Some(Entry::Post(post)) = cache.read_basic(EntityKind::Post, &liked).await? {
        cache.delete_post(&PostRecord::from(post)).await?;
    }
    checks.expect_eq(
        "delete_post",
        None,
        cache.read_basic(EntityKind::Post, &liked).await?,
    );
    let remaining = cache
        .read_full(EntityKind::User, author, ListField::Posts, Window::all())
        .await?;
    checks.expect_eq("delete_post", ids.newest(0..3), member_ids(remaining));

    Ok(())
}

async fn cleanup(cache: &FeedCache, ids: &Ids) -> Result<()> {
    cache.evict(EntityKind::User, &ids.author).await?;
    cache.evict(EntityKind::User, &ids.liker).await?;
    for post in &ids.posts {
        cache.evict(EntityKind::Post, post).await?;
    }
    Ok(())
}

/// Run the self-test scenario against `store`.
///
/// Errors raised by the engine count as failed checks; the run always
/// completes and always attempts cleanup.
pub async fn run_self_test(store: SharedStore, metrics: SharedMetrics, ttl: Duration) -> SelfTestResult {
    let start = Instant::now();
    let ids = Ids::new();
    let source = Arc::new(FixtureSource::new(graph(&ids)));
    let cache = FeedCache::new(store, source.clone(), metrics, ttl);

    let mut checks = Checks::default();
    if let Err(e) = scenario(&cache, &source, &ids, &mut checks).await {
        checks.error("scenario", e);
    }
    if let Err(e) = cleanup(&cache, &ids).await {
        checks.error("cleanup", e);
    }

    let result = SelfTestResult {
        total_assertions: checks.total,
        passed: checks.passed,
        failed: checks.failures.len(),
        failures: checks.failures,
        duration_ms: start.elapsed().as_millis() as u64,
    };

    if result.is_pass() {
        info!(
            total = result.total_assertions,
            passed = result.passed,
            duration_ms = result.duration_ms,
            "Cache self-test PASSED"
        );
    } else {
        error!(
            total = result.total_assertions,
            passed = result.passed,
            failed = result.failed,
            duration_ms = result.duration_ms,
            "Cache self-test FAILED"
        );
        for failure in &result.failures {
            error!(failure = %failure, "Self-test failure");
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::create_metrics;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_self_test_passes_on_memory_store() {
        let store = Arc::new(MemoryStore::new());
        let result = run_self_test(store.clone(), create_metrics(), Duration::hours(1)).await;
        assert!(result.is_pass(), "{}: {:?}", result, result.failures);
        assert_eq!(result.total_assertions, 9);
        // cleanup leaves nothing of the synthetic author behind
        assert!(store.keys().iter().all(|k| !k.contains("-author")));
    }

    #[test]
    fn test_result_display() {
        let result = SelfTestResult {
            total_assertions: 3,
            passed: 2,
            failed: 1,
            failures: vec![SelfTestFailure {
                check: "cache_hit",
                expected: "1".into(),
                actual: "2".into(),
            }],
            duration_ms: 4,
        };
        assert_eq!(
            result.to_string(),
            "SELF-TEST FAILED: 1/3 checks failed (1 passed) in 4ms"
        );
        assert!(result.failures[0].to_string().starts_with("[cache_hit]"));
    }
}
