//! Metrics collection for observability

use prometheus::{
    register_counter_vec_with_registry, register_counter_with_registry,
    register_histogram_vec_with_registry, register_histogram_with_registry, Counter, CounterVec,
    Histogram, HistogramOpts, HistogramVec, Opts, Registry,
};
use std::sync::Arc;
use once_cell::sync::Lazy;

/// Global metrics registry
pub static METRICS: Lazy<Arc<Metrics>> = Lazy::new(|| {
    Arc::new(Metrics::new().expect("Failed to initialize metrics"))
});

/// Metrics collector
pub struct Metrics {
    registry: Registry,

    // Proxy API metrics
    pub chat_requests: CounterVec,
    pub upstream_duration: HistogramVec,

    // Context reduction metrics
    pub reductions: CounterVec,
    pub tokens_before: Histogram,
    pub tokens_after: Histogram,
    pub oracle_fallbacks: CounterVec,

    // Rate limiting metrics
    pub rate_limit_hits: CounterVec,
    pub rate_limit_allowed: Counter,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let token_buckets = prometheus::exponential_buckets(16.0, 2.0, 12)?;

        let chat_requests = register_counter_vec_with_registry!(
            Opts::new("chat_requests_total", "Total chat completion requests"),
            &["status"],
            registry
        )?;

        let upstream_duration = register_histogram_vec_with_registry!(
            "upstream_request_duration_seconds",
            "Upstream provider request duration in seconds",
            &["stream"],
            registry
        )?;

        let reductions = register_counter_vec_with_registry!(
            Opts::new("context_reductions_total", "Total context reductions"),
            &["strategy"],
            registry
        )?;

        let tokens_before = register_histogram_with_registry!(
            HistogramOpts::new("context_tokens_before", "Tokens before reduction")
                .buckets(token_buckets.clone()),
            registry
        )?;

        let tokens_after = register_histogram_with_registry!(
            HistogramOpts::new("context_tokens_after", "Tokens after reduction")
                .buckets(token_buckets),
            registry
        )?;

        let oracle_fallbacks = register_counter_vec_with_registry!(
            Opts::new(
                "relevance_oracle_fallbacks_total",
                "Reductions that fell back to head/tail selection"
            ),
            &["reason"],
            registry
        )?;

        let rate_limit_hits = register_counter_vec_with_registry!(
            Opts::new("rate_limit_hits_total", "Total rate limit rejections"),
            &["resource"],
            registry
        )?;

        let rate_limit_allowed = register_counter_with_registry!(
            Opts::new("rate_limit_allowed_total", "Total rate limit admissions"),
            registry
        )?;

        Ok(Self {
            registry,
            chat_requests,
            upstream_duration,
            reductions,
            tokens_before,
            tokens_after,
            oracle_fallbacks,
            rate_limit_hits,
            rate_limit_allowed,
        })
    }

    /// Record a chat completion outcome
    pub fn record_chat_request(&self, status: &str) {
        self.chat_requests.with_label_values(&[status]).inc();
    }

    /// Record a finished reduction
    pub fn record_reduction(&self, strategy: &str, before: usize, after: usize) {
        self.reductions.with_label_values(&[strategy]).inc();
        self.tokens_before.observe(before as f64);
        self.tokens_after.observe(after as f64);
    }

    /// Record a reduction that had no relevance scores
    pub fn record_oracle_fallback(&self, reason: &str) {
        self.oracle_fallbacks.with_label_values(&[reason]).inc();
    }

    /// Record a rate limit decision
    pub fn record_rate_limit(&self, rejected_resource: Option<&str>) {
        match rejected_resource {
            None => self.rate_limit_allowed.inc(),
            Some(resource) => self.rate_limit_hits.with_label_values(&[resource]).inc(),
        }
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap_or_default();

        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Helper macro to time operations
#[macro_export]
macro_rules! time_operation {
    ($histogram:expr, $label:expr, $operation:expr) => {{
        let timer = $histogram.with_label_values(&[$label]).start_timer();
        let result = $operation;
        timer.observe_duration();
        result
    }};
}
