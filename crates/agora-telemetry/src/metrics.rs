//! Prometheus-backed client metrics.
//!
//! # Design
//! - Collector registration stays private; callers only see incrementers.
//! - Label values are small closed sets (table names, op names, outcomes).

use std::convert::TryFrom;
use std::sync::Arc;
use std::time::Duration;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Outcome label for a successful operation.
pub const OUTCOME_OK: &str = "ok";
/// Outcome label for a failed operation.
pub const OUTCOME_ERROR: &str = "error";

/// Metrics registry shared by the client, cache, and session manager.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    requests_total: IntCounterVec,
    cache_lookups_total: IntCounterVec,
    cache_invalidations_total: IntCounterVec,
    session_refresh_total: IntCounterVec,
    cache_hits_total: IntCounter,
    cache_misses_total: IntCounter,
    request_failures_total: IntCounter,
    cache_entries: IntGauge,
    last_request_latency_ms: IntGauge,
}

/// Snapshot of selected gauges and counters.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Reads answered from fresh cache entries.
    pub cache_hits_total: u64,
    /// Reads that went to the backend.
    pub cache_misses_total: u64,
    /// Backend calls that ended in an error.
    pub request_failures_total: u64,
    /// Entries currently held by the query cache.
    pub cache_entries: i64,
    /// Latency of the most recent backend call (ms).
    pub last_request_latency_ms: i64,
}

fn register<C>(registry: &Registry, name: &'static str, collector: &C) -> Result<()>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })
}

fn counter_vec(name: &'static str, help: &str, labels: &[&str]) -> Result<IntCounterVec> {
    IntCounterVec::new(Opts::new(name, help), labels)
        .map_err(|source| TelemetryError::MetricsRegister { name, source })
}

fn counter(name: &'static str, help: &str) -> Result<IntCounter> {
    IntCounter::with_opts(Opts::new(name, help))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })
}

fn gauge(name: &'static str, help: &str) -> Result<IntGauge> {
    IntGauge::with_opts(Opts::new(name, help))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })
}

impl Metrics {
    /// Construct a registry with the client collectors registered.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::MetricsRegister`] if a collector cannot be
    /// built or registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let requests_total = counter_vec(
            "agora_requests_total",
            "Backend calls by table, operation, and outcome",
            &["table", "op", "outcome"],
        )?;
        let cache_lookups_total = counter_vec(
            "agora_cache_lookups_total",
            "Query cache lookups by resource and result",
            &["resource", "result"],
        )?;
        let cache_invalidations_total = counter_vec(
            "agora_cache_invalidations_total",
            "Cache entries marked stale by resource",
            &["resource"],
        )?;
        let session_refresh_total = counter_vec(
            "agora_session_refresh_total",
            "Access token refresh attempts by outcome",
            &["outcome"],
        )?;
        let cache_hits_total = counter("agora_cache_hits_total", "Reads served from cache")?;
        let cache_misses_total = counter("agora_cache_misses_total", "Reads sent to the backend")?;
        let request_failures_total =
            counter("agora_request_failures_total", "Backend calls that failed")?;
        let cache_entries = gauge("agora_cache_entries", "Entries held by the query cache")?;
        let last_request_latency_ms = gauge(
            "agora_last_request_latency_ms",
            "Latency of the most recent backend call (ms)",
        )?;

        register(&registry, "agora_requests_total", &requests_total)?;
        register(&registry, "agora_cache_lookups_total", &cache_lookups_total)?;
        register(
            &registry,
            "agora_cache_invalidations_total",
            &cache_invalidations_total,
        )?;
        register(&registry, "agora_session_refresh_total", &session_refresh_total)?;
        register(&registry, "agora_cache_hits_total", &cache_hits_total)?;
        register(&registry, "agora_cache_misses_total", &cache_misses_total)?;
        register(&registry, "agora_request_failures_total", &request_failures_total)?;
        register(&registry, "agora_cache_entries", &cache_entries)?;
        register(
            &registry,
            "agora_last_request_latency_ms",
            &last_request_latency_ms,
        )?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                requests_total,
                cache_lookups_total,
                cache_invalidations_total,
                session_refresh_total,
                cache_hits_total,
                cache_misses_total,
                request_failures_total,
                cache_entries,
                last_request_latency_ms,
            }),
        })
    }

    /// Record one backend call and its latency.
    pub fn observe_request(&self, table: &str, op: &str, ok: bool, latency: Duration) {
        let outcome = if ok { OUTCOME_OK } else { OUTCOME_ERROR };
        self.inner
            .requests_total
            .with_label_values(&[table, op, outcome])
            .inc();
        if !ok {
            self.inner.request_failures_total.inc();
        }
        self.inner
            .last_request_latency_ms
            .set(Self::duration_to_ms(latency));
    }

    /// Record a cache lookup; `hit` is true when a fresh entry answered the read.
    pub fn inc_cache_lookup(&self, resource: &str, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.inner
            .cache_lookups_total
            .with_label_values(&[resource, result])
            .inc();
        if hit {
            self.inner.cache_hits_total.inc();
        } else {
            self.inner.cache_misses_total.inc();
        }
    }

    /// Record `count` entries marked stale for `resource`.
    pub fn inc_invalidation(&self, resource: &str, count: usize) {
        self.inner
            .cache_invalidations_total
            .with_label_values(&[resource])
            .inc_by(u64::try_from(count).unwrap_or(u64::MAX));
    }

    /// Record a token refresh attempt.
    pub fn inc_session_refresh(&self, ok: bool) {
        let outcome = if ok { OUTCOME_OK } else { OUTCOME_ERROR };
        self.inner
            .session_refresh_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Set the cache entry gauge.
    pub fn set_cache_entries(&self, count: usize) {
        self.inner
            .cache_entries
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Render the registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or the buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }

    /// Take a point-in-time snapshot of the headline counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cache_hits_total: self.inner.cache_hits_total.get(),
            cache_misses_total: self.inner.cache_misses_total.get(),
            request_failures_total: self.inner.request_failures_total.get(),
            cache_entries: self.inner.cache_entries.get(),
            last_request_latency_ms: self.inner.last_request_latency_ms.get(),
        }
    }

    /// Convert a duration to milliseconds saturating at `i64::MAX`.
    pub(crate) fn duration_to_ms(duration: Duration) -> i64 {
        i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_to_ms_saturates_on_large_values() {
        let duration = Duration::from_secs(u64::MAX / 2);
        assert_eq!(Metrics::duration_to_ms(duration), i64::MAX);
    }

    #[test]
    fn snapshot_reflects_updates() -> Result<()> {
        let metrics = Metrics::new()?;
        metrics.observe_request("posts", "select", true, Duration::from_millis(12));
        metrics.observe_request("offers", "update", false, Duration::from_millis(40));
        metrics.inc_cache_lookup("posts", false);
        metrics.inc_cache_lookup("posts", true);
        metrics.inc_cache_lookup("communities", true);
        metrics.inc_invalidation("posts", 3);
        metrics.inc_session_refresh(true);
        metrics.set_cache_entries(7);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cache_hits_total, 2);
        assert_eq!(snapshot.cache_misses_total, 1);
        assert_eq!(snapshot.request_failures_total, 1);
        assert_eq!(snapshot.cache_entries, 7);
        assert_eq!(snapshot.last_request_latency_ms, 40);

        let rendered = metrics.render()?;
        assert!(rendered.contains("agora_requests_total"));
        assert!(rendered.contains("agora_cache_invalidations_total"));
        assert!(rendered.contains("agora_session_refresh_total"));
        Ok(())
    }

    #[test]
    fn clones_share_the_registry() -> Result<()> {
        let metrics = Metrics::new()?;
        let clone = metrics.clone();
        clone.inc_cache_lookup("offers", true);
        assert_eq!(metrics.snapshot().cache_hits_total, 1);
        Ok(())
    }
}
