//! feedcache - operator CLI for the social feed cache
//!
//! Connects the cache engine to a Redis-compatible store (or an in-process
//! store with `--memory`) and exposes:
//! - a self-test scenario for validating a deployment
//! - cached reads, optionally read-through against a JSON record graph
//! - raw inspection, TTL refresh and eviction of single entities

use anyhow::Context;
use clap::{Parser, Subcommand};
use feedcache::cache::{run_self_test, Detail, EntityKind, ListField, Window};
use feedcache::config::Config;
use feedcache::metrics::create_metrics;
use feedcache::model::FullEntity;
use feedcache::source::{FixtureGraph, FixtureSource};
use feedcache::store::{MemoryStore, RedisStore, SharedStore};
use feedcache::FeedCache;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// feedcache - social feed cache operator tool
#[derive(Parser, Debug)]
#[command(name = "feedcache")]
#[command(author, version, about = "Social feed cache operator tool", long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long)]
    json_logs: bool,

    /// Use an in-process store instead of Redis
    #[arg(long)]
    memory: bool,

    /// Store URL (overrides REDIS_URL env var)
    #[arg(long)]
    redis_url: Option<String>,

    /// Key lifetime in seconds (overrides CACHE_TTL_SECS env var)
    #[arg(long)]
    ttl_secs: Option<u64>,

    /// JSON record graph used as the system-of-record for read-through
    #[arg(long)]
    fixture: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the cache self-test scenario against the store
    Selftest {
        /// Print Prometheus metrics after the run
        #[arg(long)]
        print_metrics: bool,
    },
    /// Read an entity, with one page of a list at full detail
    Read {
        kind: EntityKind,
        id: String,
        /// List to page through; omit for a basic read
        #[arg(long)]
        list: Option<ListField>,
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        offset: i64,
        /// Number of members; negative reads to the end
        #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
        count: i64,
        /// Populate from the record graph on a miss
        #[arg(long)]
        through: bool,
    },
    /// Dump the raw cached keys of an entity
    Inspect {
        kind: EntityKind,
        id: String,
        #[arg(long, default_value = "full")]
        detail: Detail,
    },
    /// Extend the expiry of an entity and its related keys
    Refresh {
        kind: EntityKind,
        id: String,
        #[arg(long, default_value = "full")]
        detail: Detail,
    },
    /// Delete every cached key of an entity
    Evict { kind: EntityKind, id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file first (before parsing args, so env vars are available)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    init_logging(&args.log_level, args.json_logs)?;

    // Load config (CLI flags override env vars)
    let mut config = Config::from_env()?;
    if let Some(url) = args.redis_url.clone() {
        config.store.redis_url = url;
    }
    if let Some(ttl) = args.ttl_secs {
        config.cache.ttl_secs = ttl;
    }

    let store: SharedStore = if args.memory {
        info!("Using in-process store");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(
            RedisStore::connect(&config.store.redis_url)
                .await
                .with_context(|| format!("connecting to {}", config.store.redis_url))?,
        )
    };
    let metrics = create_metrics();

    let source = match &args.fixture {
        Some(path) => FixtureSource::from_path(path)?,
        None => FixtureSource::new(FixtureGraph::default()),
    };
    let cache = FeedCache::new(store.clone(), Arc::new(source), metrics.clone(), config.ttl());

    match args.command {
        Command::Selftest { print_metrics } => {
            let result = run_self_test(store, metrics.clone(), config.ttl()).await;
            println!("{}", result);
            for failure in &result.failures {
                println!("  {}", failure);
            }
            if print_metrics {
                print!("{}", metrics.render());
            }
            if !result.is_pass() {
                anyhow::bail!("self-test failed");
            }
        }
        Command::Read {
            kind,
            id,
            list,
            offset,
            count,
            through,
        } => {
            if through && args.fixture.is_none() {
                warn!("No --fixture given; read-through has nothing to fetch from");
            }
            let window = Window::from_signed(offset, count);
            match list {
                None => emit(&cache.read_basic(kind, &id).await?)?,
                Some(list) if through => match kind {
                    EntityKind::User => emit(
                        &cache
                            .read_through_user(&id, list, window)
                            .await?
                            .map(FullEntity::User),
                    )?,
                    EntityKind::Post => emit(
                        &cache
                            .read_through_post(&id, list, window)
                            .await?
                            .map(FullEntity::Post),
                    )?,
                    EntityKind::Repost => emit(&cache.read_full(kind, &id, list, window).await?)?,
                },
                Some(list) => emit(&cache.read_full(kind, &id, list, window).await?)?,
            }
        }
        Command::Inspect { kind, id, detail } => {
            emit(&cache.inspect(kind, detail, &id).await?)?;
        }
        Command::Refresh { kind, id, detail } => {
            let touched = cache.refresh(kind, detail, &id).await?;
            info!(kind = %kind, id = %id, touched = touched, "Refreshed entity");
            emit(&serde_json::json!({ "touched": touched }))?;
        }
        Command::Evict { kind, id } => {
            cache.evict(kind, &id).await?;
            info!(kind = %kind, id = %id, "Evicted entity");
        }
    }

    Ok(())
}

fn emit<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_logging(level: &str, json: bool) -> anyhow::Result<()> {
    let level = level.parse::<Level>().unwrap_or(Level::INFO);

    // Logs go to stderr so command output stays machine readable
    let filter = EnvFilter::new(format!("feedcache={},redis=warn", level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .init();
    }

    Ok(())
}
