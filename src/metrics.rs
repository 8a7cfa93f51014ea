//! Prometheus metrics collection for tierdispatch
//!
//! This module provides metrics instrumentation for tracking:
//! - Dispatched requests by tier and outcome
//! - Provider attempts by tier and primary/fallback role
//! - Cache lookups, rate-limit timeouts and queue depth
//! - Request latency by tier
//!
//! Metrics are exposed via the `/metrics` endpoint in Prometheus text format.
//! Recording is best-effort: callers log a failed recording and carry on.

use crate::retry::AttemptRole;
use crate::router::TierId;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Request outcome label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
        }
    }
}

/// Cache lookup result label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupResult {
    Hit,
    Miss,
}

impl LookupResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            LookupResult::Hit => "hit",
            LookupResult::Miss => "miss",
        }
    }
}

/// Metrics collector for the dispatcher
///
/// All label values come from enums, so cardinality is fixed:
/// 3 tiers × 2 outcomes for requests, 3 tiers × 2 roles for attempts.
#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,
    requests_total: IntCounterVec,
    provider_attempts: IntCounterVec,
    cache_lookups: IntCounterVec,
    rate_limit_timeouts: IntCounter,
    queue_depth: IntGauge,
    request_duration: HistogramVec,
    metrics_recording_failures: IntCounterVec,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create a new Metrics instance
    ///
    /// Registers all metrics with a new Prometheus registry.
    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails (e.g., duplicate names).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new(
                "tierdispatch_requests_total",
                "Dispatched generation requests by tier and outcome",
            ),
            &["tier", "outcome"],
        )?;

        // Only attempts that reached a provider; skipped fallback attempts are not counted
        let provider_attempts = IntCounterVec::new(
            Opts::new(
                "tierdispatch_provider_attempts_total",
                "Provider calls by tier and primary/fallback role",
            ),
            &["tier", "role"],
        )?;

        let cache_lookups = IntCounterVec::new(
            Opts::new(
                "tierdispatch_cache_lookups_total",
                "Response cache lookups by result",
            ),
            &["result"],
        )?;

        let rate_limit_timeouts = IntCounter::with_opts(Opts::new(
            "tierdispatch_rate_limit_timeouts_total",
            "Requests rejected because no rate limiter slot was granted in time",
        ))?;

        let queue_depth = IntGauge::with_opts(Opts::new(
            "tierdispatch_queue_depth",
            "Tasks waiting in the dispatch queue",
        ))?;

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "tierdispatch_request_duration_ms",
                "Generation latency from admission to result in milliseconds",
            )
            .buckets(vec![
                10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0,
            ]),
            &["tier"],
        )?;

        let metrics_recording_failures = IntCounterVec::new(
            Opts::new(
                "tierdispatch_metrics_recording_failures_total",
                "Metrics recording operations that failed, by operation",
            ),
            &["operation"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(provider_attempts.clone()))?;
        registry.register(Box::new(cache_lookups.clone()))?;
        registry.register(Box::new(rate_limit_timeouts.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;
        registry.register(Box::new(metrics_recording_failures.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            requests_total,
            provider_attempts,
            cache_lookups,
            rate_limit_timeouts,
            queue_depth,
            request_duration,
            metrics_recording_failures,
        })
    }

    /// Record a finished request
    ///
    /// # Errors
    ///
    /// Returns an error if the metric is not registered.
    pub fn record_request(&self, tier: TierId, outcome: Outcome) -> Result<(), prometheus::Error> {
        self.requests_total
            .get_metric_with_label_values(&[tier.as_str(), outcome.as_str()])?
            .inc();
        Ok(())
    }

    /// Record one provider call
    pub fn record_attempt(&self, tier: TierId, role: AttemptRole) -> Result<(), prometheus::Error> {
        self.provider_attempts
            .get_metric_with_label_values(&[tier.as_str(), role.as_str()])?
            .inc();
        Ok(())
    }

    pub fn record_cache_lookup(&self, result: LookupResult) -> Result<(), prometheus::Error> {
        self.cache_lookups
            .get_metric_with_label_values(&[result.as_str()])?
            .inc();
        Ok(())
    }

    pub fn rate_limit_timeout(&self) {
        self.rate_limit_timeouts.inc();
    }

    pub fn rate_limit_timeouts_count(&self) -> u64 {
        self.rate_limit_timeouts.get()
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(i64::try_from(depth).unwrap_or(i64::MAX));
    }

    /// Record request latency
    ///
    /// # Errors
    ///
    /// Returns an error if `duration_ms` is NaN, infinite or negative; such
    /// values would corrupt every percentile of the histogram.
    pub fn record_request_duration(
        &self,
        tier: TierId,
        duration_ms: f64,
    ) -> Result<(), prometheus::Error> {
        if !duration_ms.is_finite() {
            return Err(prometheus::Error::Msg(format!(
                "Histogram value must be finite (not NaN or Infinity), got: {}",
                duration_ms
            )));
        }
        if duration_ms < 0.0 {
            return Err(prometheus::Error::Msg(format!(
                "Histogram value must be non-negative, got: {}",
                duration_ms
            )));
        }

        self.request_duration
            .get_metric_with_label_values(&[tier.as_str()])?
            .observe(duration_ms);
        Ok(())
    }

    /// Record a metrics recording operation failure
    ///
    /// `operation` is the name of the recording method that failed, e.g.
    /// "record_request".
    pub fn metrics_recording_failure(&self, operation: &str) {
        self.metrics_recording_failures
            .with_label_values(&[operation])
            .inc();
    }

    /// Total metrics recording failures across all operations
    pub fn metrics_recording_failures_count(&self) -> u64 {
        self.registry
            .gather()
            .iter()
            .find(|mf| mf.name() == "tierdispatch_metrics_recording_failures_total")
            .map(|mf| {
                mf.get_metric()
                    .iter()
                    .map(|m| m.counter.value.unwrap_or(0.0) as u64)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Gather all metrics and encode them in Prometheus text format
    ///
    /// # Errors
    ///
    /// Returns an error if metric encoding fails.
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let metric_families = self.registry.gather();
        let metric_count = metric_families.len();

        tracing::debug!(
            metric_family_count = metric_count,
            "Encoding metrics to Prometheus text format"
        );

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    metric_family_count = metric_count,
                    "Prometheus text encoder failed"
                );
                prometheus::Error::Msg(format!(
                    "Failed to encode {} metric families: {}",
                    metric_count, e
                ))
            })?;

        String::from_utf8(buffer).map_err(|e| {
            tracing::error!(
                invalid_byte_index = e.utf8_error().valid_up_to(),
                "Prometheus encoder produced invalid UTF-8"
            );
            prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e))
        })
    }
}
