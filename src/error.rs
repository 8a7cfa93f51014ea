//! Error types for tierdispatch
//!
//! `DispatchError` is the dispatcher's own taxonomy. Only `RateLimitTimeout`
//! and `RetriesExhausted` are expected to reach callers in normal operation;
//! the remaining variants are recovered locally (retry, tier fallback) or
//! signal misconfiguration and lifecycle events.
//!
//! `AppError` is the application-level error used by the binary and the HTTP
//! handlers. It implements `IntoResponse` for Axum.

use crate::router::TierId;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Errors raised while dispatching a generation request
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    /// Admission into execution was not granted before the limiter timeout
    #[error("Rate limit slot not granted within {waited_ms}ms")]
    RateLimitTimeout { waited_ms: u64 },

    /// The provider adapter raised an error (retryable)
    #[error("Provider {provider} failed: {reason}")]
    ProviderTransient { provider: String, reason: String },

    /// The provider answered but the validator rejected the response (retryable)
    #[error("Response rejected by validator")]
    ValidationFailure,

    /// A tier reached its daily request cap
    #[error("Daily quota exhausted for tier {tier} ({used}/{limit})")]
    QuotaExceeded { tier: TierId, used: u32, limit: u32 },

    /// All retry attempts failed
    #[error("Request failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// A tier references a provider that was never registered
    #[error("Provider '{0}' is not configured")]
    ProviderNotConfigured(String),

    /// An even (fallback) attempt was scheduled but no fallback provider exists
    #[error("No fallback provider configured for tier {tier}")]
    FallbackUnavailable { tier: TierId },

    /// The dispatcher no longer accepts work
    #[error("Dispatcher is shutting down")]
    ShuttingDown,

    /// The dispatch loop dropped the task before it produced a result
    #[error("Queued task was dropped before completion")]
    TaskDropped,
}

/// Main error type for the application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read config file '{path}': {source}")]
    ConfigFileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    ConfigParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration in '{path}': {reason}")]
    ConfigValidationFailed { path: String, reason: String },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Dispatch(DispatchError::RateLimitTimeout { .. }) => StatusCode::TOO_MANY_REQUESTS,
            Self::Dispatch(DispatchError::RetriesExhausted { .. }) => StatusCode::BAD_GATEWAY,
            Self::Dispatch(DispatchError::ShuttingDown) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Dispatch(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Config(_)
            | Self::ConfigFileRead { .. }
            | Self::ConfigParseFailed { .. }
            | Self::ConfigValidationFailed { .. }
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(serde_json::json!({
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}

/// Convenience type alias for Results
pub type AppResult<T> = Result<T, AppError>;

/// Convenience alias for dispatcher results
pub type DispatchResult<T> = Result<T, DispatchError>;
