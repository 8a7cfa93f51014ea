//! Sliding-window rate limiter
//!
//! Bounds both the number of admissions in the trailing second and the number
//! of requests in flight. The admission check and the window/counter update
//! happen under one lock acquisition, so no other task can observe or act on
//! the state between them.

use crate::config::LimiterConfig;
use crate::error::DispatchError;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Length of the rolling admission window
const WINDOW: Duration = Duration::from_millis(1000);

/// Recent admission timestamps plus the in-flight counter
#[derive(Debug, Default)]
struct RateWindow {
    timestamps: VecDeque<Instant>,
    active: u32,
}

impl RateWindow {
    /// Drop timestamps at least one window old
    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.timestamps.front() {
            if now.duration_since(*oldest) >= WINDOW {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Point-in-time view of limiter utilisation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LimiterSnapshot {
    pub requests_last_second: u32,
    pub max_requests_per_second: u32,
    pub burst_allowance: u32,
    pub active: u32,
    pub max_concurrent: u32,
    /// `requests_last_second / max_requests_per_second`
    pub rate_utilization: f64,
    /// `active / max_concurrent`
    pub concurrency_utilization: f64,
}

/// Rate limiter gating admission into provider calls
#[derive(Debug)]
pub struct RateLimiter {
    config: LimiterConfig,
    window: Mutex<RateWindow>,
}

impl RateLimiter {
    pub fn new(config: LimiterConfig) -> Self {
        Self {
            config,
            window: Mutex::new(RateWindow::default()),
        }
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    fn window_capacity(&self) -> usize {
        (self.config.max_requests_per_second + self.config.burst_allowance) as usize
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis((self.config.cooldown_ms / 10).max(1))
    }

    fn admissible(&self, window: &RateWindow) -> bool {
        window.timestamps.len() < self.window_capacity()
            && window.active < self.config.max_concurrent
    }

    /// Whether a request could be admitted right now
    pub async fn can_proceed(&self) -> bool {
        let mut window = self.window.lock().await;
        window.prune(Instant::now());
        self.admissible(&window)
    }

    /// Claim a slot if one is free, without waiting
    pub async fn try_acquire(&self) -> bool {
        let mut window = self.window.lock().await;
        let now = Instant::now();
        window.prune(now);
        if self.admissible(&window) {
            window.timestamps.push_back(now);
            window.active += 1;
            true
        } else {
            false
        }
    }

    /// Wait until a slot is free and claim it
    ///
    /// Polls every `cooldown_ms / 10`. Every successful call must be paired
    /// with one [`release_slot`](Self::release_slot).
    ///
    /// # Errors
    /// `RateLimitTimeout` once `admission_timeout_ms` has elapsed without a
    /// slot. The limiter never retries this itself.
    pub async fn wait_for_slot(&self) -> Result<(), DispatchError> {
        let started = Instant::now();
        let timeout = Duration::from_millis(self.config.admission_timeout_ms);
        let poll = self.poll_interval();

        loop {
            if self.try_acquire().await {
                let waited = started.elapsed();
                if waited >= poll {
                    tracing::debug!(
                        waited_ms = waited.as_millis() as u64,
                        "Rate limit slot granted after waiting"
                    );
                }
                return Ok(());
            }

            let waited = started.elapsed();
            if waited >= timeout {
                tracing::warn!(
                    waited_ms = waited.as_millis() as u64,
                    max_concurrent = self.config.max_concurrent,
                    max_requests_per_second = self.config.max_requests_per_second,
                    "Rate limit admission timed out"
                );
                return Err(DispatchError::RateLimitTimeout {
                    waited_ms: waited.as_millis() as u64,
                });
            }

            tokio::time::sleep(poll.min(timeout - waited)).await;
        }
    }

    /// Release a slot claimed by `wait_for_slot`; never goes below zero
    pub async fn release_slot(&self) {
        let mut window = self.window.lock().await;
        if window.active == 0 {
            tracing::warn!("release_slot called with no active requests");
            return;
        }
        window.active -= 1;
    }

    /// Current utilisation
    pub async fn snapshot(&self) -> LimiterSnapshot {
        let mut window = self.window.lock().await;
        window.prune(Instant::now());
        let requests_last_second = window.timestamps.len() as u32;
        LimiterSnapshot {
            requests_last_second,
            max_requests_per_second: self.config.max_requests_per_second,
            burst_allowance: self.config.burst_allowance,
            active: window.active,
            max_concurrent: self.config.max_concurrent,
            rate_utilization: f64::from(requests_last_second)
                / f64::from(self.config.max_requests_per_second),
            concurrency_utilization: f64::from(window.active)
                / f64::from(self.config.max_concurrent),
        }
    }
}
