//! Retry engine with bounded exponential backoff
//!
//! `execute` runs an operation up to `max_retries` times. A raised error or a
//! result rejected by the validator counts as a failed attempt. Between
//! attempts it sleeps
//!
//! ```text
//! min(initial_delay * multiplier^(attempt - 1) + uniform(0, jitter), max_delay)
//! ```
//!
//! The operation receives the attempt number (1-based) so it can alternate
//! between a primary and a fallback backend, see [`ProviderPair`].
//!
//! Worst-case latency is the sum of all backoff delays plus every attempt's own
//! duration; the engine bounds the attempt count, not elapsed time.

pub mod failover;
pub mod validators;

pub use failover::{AttemptRole, ProviderPair, ProviderRoute};
pub use validators::Validator;

use crate::config::RetryConfig;
use crate::error::DispatchError;
use rand::Rng;
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Aggregate retry statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetryStats {
    /// Attempts made across all sequences
    pub total_attempts: u64,
    /// Sequences that succeeded on the first attempt or later
    pub successes: u64,
    /// Sequences that succeeded only after attempt 1
    pub successful_retries: u64,
    /// Sequences that exhausted every attempt
    pub failed_retries: u64,
    /// Running mean of attempts needed by successful sequences
    pub average_attempts_to_success: f64,
}

impl RetryStats {
    fn record_success(&mut self, attempts: u32) {
        self.successes += 1;
        if attempts > 1 {
            self.successful_retries += 1;
        }
        let n = self.successes as f64;
        let delta = f64::from(attempts) - self.average_attempts_to_success;
        self.average_attempts_to_success += delta / n;
    }
}

/// Executes fallible operations with backoff
#[derive(Debug)]
pub struct RetryEngine {
    config: RetryConfig,
    stats: Mutex<RetryStats>,
}

impl RetryEngine {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            stats: Mutex::new(RetryStats::default()),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay after a failed `attempt`, without jitter, capped at `max_delay_ms`
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let growth = self.config.backoff_multiplier.powi(exponent);
        let raw = self.config.initial_delay_ms as f64 * growth;
        Duration::from_millis(raw.min(self.config.max_delay_ms as f64) as u64)
    }

    /// Delay after a failed `attempt`, jitter included, never above `max_delay_ms`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let jitter = if self.config.jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=self.config.jitter_ms)
        };
        let max = Duration::from_millis(self.config.max_delay_ms);
        (self.base_delay(attempt) + Duration::from_millis(jitter)).min(max)
    }

    /// Run `op` until it succeeds, the validator accepts its result, or
    /// `max_retries` attempts have been made
    ///
    /// # Errors
    /// `RetriesExhausted` carrying the attempt count and the last underlying
    /// error message.
    pub async fn execute<T, E, F, Fut>(
        &self,
        mut op: F,
        validator: Option<&(dyn Fn(&T) -> bool + Sync)>,
    ) -> Result<T, DispatchError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let max_attempts = self.config.max_retries.max(1);
        let mut attempt = 1;

        loop {
            self.lock_stats().total_attempts += 1;

            let last_error = match op(attempt).await {
                Ok(result) if validator.is_none_or(|accept| accept(&result)) => {
                    self.lock_stats().record_success(attempt);
                    if attempt > 1 {
                        tracing::info!(attempt = attempt, "Operation succeeded after retry");
                    }
                    return Ok(result);
                }
                Ok(_) => DispatchError::ValidationFailure.to_string(),
                Err(e) => e.to_string(),
            };

            if attempt >= max_attempts {
                self.lock_stats().failed_retries += 1;
                tracing::error!(
                    attempts = attempt,
                    last_error = %last_error,
                    "All retry attempts exhausted"
                );
                return Err(DispatchError::RetriesExhausted {
                    attempts: attempt,
                    last_error,
                });
            }

            let delay = self.backoff_delay(attempt);
            tracing::warn!(
                attempt = attempt,
                max_attempts = max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %last_error,
                "Attempt failed, backing off before retry"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Copy of the current statistics
    pub fn stats(&self) -> RetryStats {
        self.lock_stats().clone()
    }

    /// Zero the statistics
    pub fn reset_stats(&self) {
        *self.lock_stats() = RetryStats::default();
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, RetryStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
