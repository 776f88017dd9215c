//! Prometheus metrics for monitoring the feed cache.
//!
//! Counters cover read outcomes, gap fetches against the system-of-record,
//! propagated mutations, TTL refreshes and evictions; a histogram tracks
//! list splice latency.

use prometheus::{Counter, CounterVec, Histogram, HistogramOpts, Opts, Registry};
use std::sync::Arc;
use tracing::error;

/// All metrics for the feed cache
pub struct Metrics {
    pub registry: Registry,

    // Read metrics
    pub reads_total: CounterVec,
    pub gap_fetches_total: CounterVec,

    // Write metrics
    pub mutations_total: CounterVec,
    pub splice_duration_seconds: Histogram,

    // Expiry metrics
    pub refreshed_keys_total: Counter,
    pub evicted_keys_total: Counter,
}

impl Metrics {
    /// Create a new metrics registry with all metrics
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Read metrics
        let reads_total = CounterVec::new(
            Opts::new("feedcache_reads_total", "Cache reads by entity and outcome"),
            &["kind", "outcome"],
        )?;
        registry.register(Box::new(reads_total.clone()))?;

        let gap_fetches_total = CounterVec::new(
            Opts::new(
                "feedcache_gap_fetches_total",
                "List pages fetched from the system-of-record",
            ),
            &["list"],
        )?;
        registry.register(Box::new(gap_fetches_total.clone()))?;

        // Write metrics
        let mutations_total = CounterVec::new(
            Opts::new("feedcache_mutations_total", "Propagated mutations by operation"),
            &["op"],
        )?;
        registry.register(Box::new(mutations_total.clone()))?;

        let splice_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "feedcache_splice_duration_seconds",
                "Time to merge a fetched page into a cached list",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]),
        )?;
        registry.register(Box::new(splice_duration_seconds.clone()))?;

        // Expiry metrics
        let refreshed_keys_total = Counter::with_opts(Opts::new(
            "feedcache_refreshed_keys_total",
            "Keys whose expiry was extended",
        ))?;
        registry.register(Box::new(refreshed_keys_total.clone()))?;

        let evicted_keys_total = Counter::with_opts(Opts::new(
            "feedcache_evicted_keys_total",
            "Keys deleted by explicit eviction",
        ))?;
        registry.register(Box::new(evicted_keys_total.clone()))?;

        Ok(Self {
            registry,
            reads_total,
            gap_fetches_total,
            mutations_total,
            splice_duration_seconds,
            refreshed_keys_total,
            evicted_keys_total,
        })
    }

    /// Record a cache read; `outcome` is `hit` or `miss`
    pub fn record_read(&self, kind: &str, outcome: &str) {
        self.reads_total.with_label_values(&[kind, outcome]).inc();
    }

    pub fn record_gap_fetch(&self, list: &str) {
        self.gap_fetches_total.with_label_values(&[list]).inc();
    }

    pub fn record_mutation(&self, op: &str) {
        self.mutations_total.with_label_values(&[op]).inc();
    }

    pub fn record_splice(&self, duration_secs: f64) {
        self.splice_duration_seconds.observe(duration_secs);
    }

    pub fn record_refresh(&self, keys: usize) {
        self.refreshed_keys_total.inc_by(keys as f64);
    }

    pub fn record_eviction(&self, keys: usize) {
        self.evicted_keys_total.inc_by(keys as f64);
    }

    /// Render metrics in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        match encoder.encode_to_string(&metric_families) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "Failed to encode metrics");
                String::new()
            }
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}

/// Shared metrics instance
pub type SharedMetrics = Arc<Metrics>;

/// Create a shared metrics instance
pub fn create_metrics() -> SharedMetrics {
    Arc::new(Metrics::new().expect("Failed to create metrics"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert!(metrics.render().contains("feedcache_refreshed_keys_total"));
    }

    #[test]
    fn test_read_recording() {
        let metrics = Metrics::new().unwrap();
        metrics.record_read("user", "hit");
        metrics.record_read("user", "hit");
        metrics.record_read("post_full", "miss");

        assert_eq!(
            metrics.reads_total.with_label_values(&["user", "hit"]).get(),
            2.0
        );
        let output = metrics.render();
        assert!(output.contains("feedcache_reads_total"));
        assert!(output.contains("outcome=\"miss\""));
    }

    #[test]
    fn test_key_counters_accumulate() {
        let metrics = Metrics::new().unwrap();
        metrics.record_refresh(12);
        metrics.record_refresh(3);
        metrics.record_eviction(7);
        assert_eq!(metrics.refreshed_keys_total.get(), 15.0);
        assert_eq!(metrics.evicted_keys_total.get(), 7.0);
    }
}
