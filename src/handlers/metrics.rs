//! Prometheus metrics endpoint
//!
//! Exposes metrics in Prometheus text format for scraping.

use axum::{extract::State, http::StatusCode};

use crate::handlers::AppState;

/// Metrics handler for Prometheus scraping
///
/// # Response
///
/// - `200 OK` with metrics in Prometheus text format
/// - `500 Internal Server Error` if metrics collection fails
///
/// # Example
///
/// ```bash
/// curl http://localhost:3000/metrics
/// # HELP tierdispatch_requests_total Dispatched generation requests by tier and outcome
/// # TYPE tierdispatch_requests_total counter
/// tierdispatch_requests_total{outcome="success",tier="pro"} 42
/// ```
pub async fn handler(State(state): State<AppState>) -> (StatusCode, String) {
    // Refresh the gauge so an idle queue scrapes as zero
    let depth = state.dispatcher().status().await.queue_depth;
    state.metrics().set_queue_depth(depth);

    match state.metrics().gather() {
        Ok(output) => (StatusCode::OK, output),
        Err(e) => {
            tracing::error!(error = %e, "Failed to gather metrics for Prometheus scraping");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to gather metrics: {}", e),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support;
    use crate::metrics::Outcome;
    use crate::router::TierId;

    #[tokio::test]
    async fn test_metrics_handler_returns_prometheus_format() {
        let state = test_support::state();
        state
            .metrics()
            .record_request(TierId::Free, Outcome::Success)
            .unwrap();

        let (status, body) = handler(State(state)).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("# HELP"));
        assert!(body.contains("# TYPE"));
        assert!(body.contains("tierdispatch_requests_total"));
        assert!(body.contains("tierdispatch_queue_depth 0"));
    }

    #[tokio::test]
    async fn test_concurrent_metrics_scraping() {
        let state = test_support::state();
        let mut handles = Vec::new();
        for _ in 0..10 {
            let state = state.clone();
            handles.push(tokio::spawn(async move { handler(State(state)).await }));
        }
        for handle in handles {
            let (status, _) = handle.await.unwrap();
            assert_eq!(status, StatusCode::OK);
        }
    }
}
