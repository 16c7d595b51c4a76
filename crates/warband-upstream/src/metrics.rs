//! Prometheus metrics for the upstream client

use crate::rate_limit::RateLimiter;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use warband_cache::CacheStats;

/// Outcome label of one orchestrated operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Hit,
    Fetched,
    NotFound,
    RateLimited,
    Failed,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Fetched => "fetched",
            Self::NotFound => "not_found",
            Self::RateLimited => "rate_limited",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamMetrics {
    registry: Registry,

    operations: IntCounterVec,
    upstream_requests: IntCounter,
    schema_drift: IntCounter,
    archive_failures: IntCounter,

    // Refreshed from snapshots at gather time
    available_tokens: IntGauge,
    waiting_callers: IntGauge,
    throttled_calls: IntGauge,
    cache_hits: IntGauge,
    cache_misses: IntGauge,
    cache_stale_served: IntGauge,
    cache_write_failures: IntGauge,
}

impl UpstreamMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let operations = IntCounterVec::new(
            Opts::new(
                "warband_operations_total",
                "Orchestrated operations by name and outcome",
            ),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(operations.clone()))?;

        let upstream_requests = IntCounter::new(
            "warband_upstream_requests_total",
            "HTTP requests sent upstream, retries included",
        )?;
        registry.register(Box::new(upstream_requests.clone()))?;

        let schema_drift = IntCounter::new(
            "warband_schema_drift_total",
            "Upstream payloads that failed strict decoding",
        )?;
        registry.register(Box::new(schema_drift.clone()))?;

        let archive_failures = IntCounter::new(
            "warband_archive_failures_total",
            "History records that could not be written",
        )?;
        registry.register(Box::new(archive_failures.clone()))?;

        let available_tokens = IntGauge::new(
            "warband_rate_limit_available_tokens",
            "Tokens currently in the upstream rate limiter",
        )?;
        registry.register(Box::new(available_tokens.clone()))?;

        let waiting_callers = IntGauge::new(
            "warband_rate_limit_waiting",
            "Callers suspended waiting for a rate limit token",
        )?;
        registry.register(Box::new(waiting_callers.clone()))?;

        let throttled_calls = IntGauge::new(
            "warband_rate_limit_throttled",
            "Token acquisitions that had to wait since start",
        )?;
        registry.register(Box::new(throttled_calls.clone()))?;

        let cache_hits = IntGauge::new("warband_cache_hits", "Cache hits since start")?;
        registry.register(Box::new(cache_hits.clone()))?;

        let cache_misses = IntGauge::new("warband_cache_misses", "Cache misses since start")?;
        registry.register(Box::new(cache_misses.clone()))?;

        let cache_stale_served = IntGauge::new(
            "warband_cache_stale_served",
            "Stale values served after a failed refresh",
        )?;
        registry.register(Box::new(cache_stale_served.clone()))?;

        let cache_write_failures = IntGauge::new(
            "warband_cache_write_failures",
            "Cache writes that failed or were dropped",
        )?;
        registry.register(Box::new(cache_write_failures.clone()))?;

        Ok(Self {
            registry,
            operations,
            upstream_requests,
            schema_drift,
            archive_failures,
            available_tokens,
            waiting_callers,
            throttled_calls,
            cache_hits,
            cache_misses,
            cache_stale_served,
            cache_write_failures,
        })
    }

    pub fn record_operation(&self, operation: &str, outcome: Outcome) {
        self.operations
            .with_label_values(&[operation, outcome.as_str()])
            .inc();
    }

    pub fn operation_count(&self, operation: &str, outcome: Outcome) -> u64 {
        self.operations
            .with_label_values(&[operation, outcome.as_str()])
            .get()
    }

    /// Counter handed to the fetcher, bumped once per HTTP attempt.
    pub(crate) fn upstream_requests(&self) -> IntCounter {
        self.upstream_requests.clone()
    }

    pub fn record_schema_drift(&self) {
        self.schema_drift.inc();
    }

    pub fn record_archive_failure(&self) {
        self.archive_failures.inc();
    }

    #[allow(clippy::cast_possible_wrap)]
    pub fn update_from_snapshots(&self, limiter: &RateLimiter, cache: &CacheStats) {
        let status = limiter.status();
        self.available_tokens.set(i64::from(status.available_tokens));
        self.waiting_callers.set(status.waiting as i64);
        self.throttled_calls.set(limiter.throttled() as i64);
        self.cache_hits.set(cache.hits as i64);
        self.cache_misses.set(cache.misses as i64);
        self.cache_stale_served.set(cache.stale_served as i64);
        self.cache_write_failures.set(cache.write_failures as i64);
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> String {
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_includes_operation_counters() {
        let metrics = UpstreamMetrics::new().unwrap();
        metrics.record_operation("player", Outcome::Hit);
        metrics.record_operation("player", Outcome::Hit);

        assert_eq!(metrics.operation_count("player", Outcome::Hit), 2);
        let text = metrics.gather();
        assert!(text.contains("warband_operations_total"));
        assert!(text.contains("outcome=\"hit\""));
    }
}
