//! feedcache - write-through / read-through cache for a social feed
//!
//! Users, posts and reposts are cached in a Redis-compatible key-value store
//! at two detail levels:
//! - Basic: scalar fields only
//! - Full: scalar fields plus relationship lists that may be partially known
//!
//! Partially known lists carry stub tokens for unknown runs, so paginated
//! reads can be served from cache, partially filled from the
//! system-of-record, or fetched whole. Mutations are propagated into every
//! cached list and counter they affect.

pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod source;
pub mod store;

#[cfg(test)]
mod testkit;

pub use cache::FeedCache;
pub use error::{FeedCacheError, Result};
