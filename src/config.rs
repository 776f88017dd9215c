use anyhow::{Context, Result};
use std::env;

/// Default store location
const DEFAULT_REDIS_URL: &str = "redis://localhost:6421/0";

/// Default key lifetime: 1 hour in seconds
const DEFAULT_CACHE_TTL_SECS: u64 = 60 * 60;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub redis_url: String,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl_secs: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreConfig,
    pub cache: CacheConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let ttl_secs = match env::var("CACHE_TTL_SECS") {
            Ok(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("CACHE_TTL_SECS is not a number: {}", raw))?,
            Err(_) => DEFAULT_CACHE_TTL_SECS,
        };

        Ok(Self {
            store: StoreConfig {
                redis_url: env::var("REDIS_URL").unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string()),
            },
            cache: CacheConfig { ttl_secs },
        })
    }

    /// Key lifetime applied on every write and refresh
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cache.ttl_secs as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_conversion() {
        let config = Config {
            store: StoreConfig {
                redis_url: DEFAULT_REDIS_URL.to_string(),
            },
            cache: CacheConfig { ttl_secs: 90 },
        };
        assert_eq!(config.ttl(), chrono::Duration::seconds(90));
    }
}
