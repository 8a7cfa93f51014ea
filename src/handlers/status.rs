//! Dispatcher status endpoint

use axum::{Json, extract::State};

use crate::dispatcher::DispatcherStatus;
use crate::handlers::AppState;

/// GET /status: queue depth, limiter utilisation, retry statistics, quota
/// usage per tier, usage totals and cache counters
pub async fn handler(State(state): State<AppState>) -> Json<DispatcherStatus> {
    Json(state.dispatcher().status().await)
}
