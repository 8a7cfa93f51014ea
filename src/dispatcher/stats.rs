//! Usage accounting and the status snapshot

use crate::cache::CacheStats;
use crate::limiter::LimiterSnapshot;
use crate::retry::RetryStats;
use crate::router::TierQuotaSnapshot;
use serde::Serialize;

/// Process-wide usage counters, reset only by an explicit daily reset
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Running mean over completed (successful or failed) dispatched requests
    pub average_latency_ms: f64,
    /// Sum of `cost_per_request` over provider attempts
    pub cost_to_date: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl UsageStats {
    pub fn record_success(&mut self, latency_ms: u64) {
        self.successful_requests += 1;
        self.record_latency(latency_ms);
    }

    pub fn record_failure(&mut self, latency_ms: u64) {
        self.failed_requests += 1;
        self.record_latency(latency_ms);
    }

    pub fn add_cost(&mut self, cost: f64) {
        self.cost_to_date += cost;
    }

    fn record_latency(&mut self, latency_ms: u64) {
        self.total_requests += 1;
        let n = self.total_requests as f64;
        self.average_latency_ms += (latency_ms as f64 - self.average_latency_ms) / n;
    }
}

/// Introspection snapshot for dashboards and the `/status` endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatcherStatus {
    pub queue_depth: usize,
    pub dispatch_loops: usize,
    pub shutting_down: bool,
    pub limiter: LimiterSnapshot,
    pub retry: RetryStats,
    pub quota: Vec<TierQuotaSnapshot>,
    pub usage: UsageStats,
    pub cache: CacheStats,
}
