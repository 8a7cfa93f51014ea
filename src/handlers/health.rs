//! Health check endpoint
//!
//! Provides a simple health check for monitoring and load balancers.

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::handlers::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: &'static str,
    /// "accepting" or "draining"
    pub dispatcher: &'static str,
    /// "operational", or "degraded" once any metrics recording has failed
    pub metrics_status: &'static str,
}

/// Health check handler
///
/// Returns 200 while the dispatcher accepts work and 503 once it is draining
/// for shutdown, so load balancers stop sending traffic.
pub async fn handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let metrics_status = if state.metrics().metrics_recording_failures_count() > 0 {
        "degraded"
    } else {
        "operational"
    };

    if state.dispatcher().is_shutting_down() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "SHUTTING_DOWN",
                dispatcher: "draining",
                metrics_status,
            }),
        );
    }

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "OK",
            dispatcher: "accepting",
            metrics_status,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support;

    #[tokio::test]
    async fn test_health_handler_returns_ok() {
        let state = test_support::state();
        let (status, Json(body)) = handler(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "OK");
        assert_eq!(body.dispatcher, "accepting");
        assert_eq!(body.metrics_status, "operational");
    }

    #[tokio::test]
    async fn test_health_handler_shows_degraded_metrics() {
        let state = test_support::state();
        state.metrics().metrics_recording_failure("record_request");

        let (status, Json(body)) = handler(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.metrics_status, "degraded");
    }

    #[tokio::test]
    async fn test_health_handler_reports_draining() {
        let state = test_support::state();
        state.dispatcher().shutdown().await;

        let (status, Json(body)) = handler(State(state)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.dispatcher, "draining");
    }
}
