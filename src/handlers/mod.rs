//! HTTP request handlers for the dispatcher API

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::{AppError, AppResult};
use crate::metrics::Metrics;
use crate::middleware::request_id_middleware;
use axum::{
    Router, middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod generate;
pub mod health;
pub mod metrics;
pub mod status;

/// Application state shared across all handlers
///
/// Wraps the dispatcher handle, which is itself an `Arc`, so cloning is cheap.
#[derive(Clone, Debug)]
pub struct AppState {
    dispatcher: Dispatcher,
}

impl AppState {
    /// Create the state from configuration, building HTTP provider adapters
    ///
    /// # Errors
    /// Returns an error if metrics registration or a provider adapter fails.
    pub fn new(config: Arc<Config>) -> AppResult<Self> {
        let metrics = Metrics::new()
            .map_err(|e| AppError::Internal(format!("Failed to initialize metrics: {}", e)))?;
        let dispatcher = Dispatcher::from_config(config, metrics)?;
        Ok(Self { dispatcher })
    }

    /// Wrap an existing dispatcher
    pub fn with_dispatcher(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    pub fn config(&self) -> &Config {
        self.dispatcher.config()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn metrics(&self) -> &Metrics {
        self.dispatcher.metrics()
    }
}

/// Build the Axum application with all routes and middleware
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::handler))
        .route("/status", get(status::handler))
        .route("/metrics", get(metrics::handler))
        .route("/v1/generate", post(generate::handler))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appstate_is_clonable() {
        let state = test_support::state();
        let clone = state.clone();
        assert_eq!(clone.config().server.port, 3000);
        assert_eq!(clone.config().tiers.len(), 1);
    }

    #[test]
    fn test_appstate_new_builds_providers_from_config() {
        let config: Config = r#"
[[providers]]
name = "groq"
base_url = "https://api.groq.com/openai/v1"

[[tiers]]
id = "free"
endpoint = "groq"
default_model = "llama-3.1-8b-instant"
"#
        .parse()
        .expect("valid config");
        let state = AppState::new(Arc::new(config)).expect("state builds");
        assert!(!state.dispatcher().is_shutting_down());
    }
}
