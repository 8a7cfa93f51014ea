//! HTTP surface tests driven through the router with `oneshot`

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tierdispatch::config::{Config, TierConfig};
use tierdispatch::dispatcher::Dispatcher;
use tierdispatch::handlers::{AppState, app};
use tierdispatch::metrics::Metrics;
use tierdispatch::middleware::REQUEST_ID_HEADER;
use tierdispatch::providers::{
    ChatMessage, InvokeOptions, Provider, ProviderError, ProviderRegistry,
};
use tierdispatch::router::TierId;
use tower::ServiceExt;

/// Answers with the last user message reversed after an optional delay
struct Mirror {
    delay: Duration,
    fail: bool,
}

#[async_trait]
impl Provider for Mirror {
    fn name(&self) -> &str {
        "mirror"
    }

    async fn invoke(
        &self,
        messages: &[ChatMessage],
        model: &str,
        _options: &InvokeOptions,
    ) -> Result<String, ProviderError> {
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(ProviderError::Http {
                status: 502,
                body: "bad gateway".to_string(),
            });
        }
        let prompt = messages.last().map(|m| m.content.as_str()).unwrap_or("");
        Ok(format!("[{model}] {}", prompt.chars().rev().collect::<String>()))
    }
}

fn state_with(provider: Mirror, timeout_seconds: u64) -> AppState {
    let mut config = Config::with_tiers(vec![TierConfig::new(TierId::Free, "mirror", "tiny")]);
    config.server.request_timeout_seconds = timeout_seconds;
    config.retry.max_retries = 1;
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(provider));
    AppState::with_dispatcher(Dispatcher::new(
        Arc::new(config),
        registry,
        Metrics::new().unwrap(),
    ))
}

fn default_app() -> (AppState, Router) {
    let state = state_with(
        Mirror {
            delay: Duration::ZERO,
            fail: false,
        },
        30,
    );
    (state.clone(), app(state))
}

fn generate_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/generate")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_generate_returns_content_and_request_id() {
    let (_, app) = default_app();
    let response = app
        .oneshot(generate_request(json!({ "prompt": "hello world" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let header_id = response
        .headers()
        .get(REQUEST_ID_HEADER)
        .expect("request id header")
        .to_str()
        .unwrap()
        .to_string();

    let body = json_body(response).await;
    assert_eq!(body["content"], "[tiny] dlrow olleh");
    assert_eq!(body["tier"], "free");
    assert_eq!(body["model"], "tiny");
    assert_eq!(body["model_source"], "tier_default");
    assert_eq!(body["cached"], false);
    assert_eq!(body["attempts"], 1);
    assert_eq!(body["request_id"], header_id);
}

#[tokio::test]
async fn test_second_identical_prompt_is_cached() {
    let (_, app) = default_app();
    let first = app
        .clone()
        .oneshot(generate_request(json!({ "prompt": "cache this answer" })))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .oneshot(generate_request(json!({ "prompt": "Cache this answer!" })))
        .await
        .unwrap();
    let body = json_body(second).await;
    assert_eq!(body["cached"], true);
    assert_eq!(body["similarity"], 1.0);
    assert_eq!(body["tier"], Value::Null);
}

#[tokio::test]
async fn test_invalid_body_is_rejected_before_dispatch() {
    let (state, app) = default_app();

    for body in [
        json!({ "prompt": "" }),
        json!({ "prompt": "hi", "temperature": 7.0 }),
        json!({ "prompt": "hi", "plan": "platinum" }),
        json!({ "nope": true }),
    ] {
        let response = app.clone().oneshot(generate_request(body.clone())).await.unwrap();
        assert!(
            response.status().is_client_error(),
            "{body} gave {}",
            response.status()
        );
    }

    assert_eq!(state.dispatcher().status().await.usage.total_requests, 0);
}

#[tokio::test]
async fn test_provider_failure_maps_to_bad_gateway() {
    let state = state_with(
        Mirror {
            delay: Duration::ZERO,
            fail: true,
        },
        30,
    );
    let response = app(state)
        .oneshot(generate_request(json!({ "prompt": "will fail" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = json_body(response).await;
    assert!(body["error"].as_str().unwrap().contains("failed after 1 attempts"));
}

#[tokio::test(start_paused = true)]
async fn test_slow_generation_times_out() {
    let state = state_with(
        Mirror {
            delay: Duration::from_secs(10),
            fail: false,
        },
        2,
    );
    let response = app(state)
        .oneshot(generate_request(json!({ "prompt": "slow one" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    let body = json_body(response).await;
    assert_eq!(body["error"], "Request timed out after 2 seconds");
}

#[tokio::test]
async fn test_health_status_and_metrics_endpoints() {
    let (_, app) = default_app();

    let health = app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(health.status(), StatusCode::OK);
    assert_eq!(json_body(health).await["status"], "OK");

    let status = app.clone().oneshot(get("/status")).await.unwrap();
    assert_eq!(status.status(), StatusCode::OK);
    let body = json_body(status).await;
    assert_eq!(body["queue_depth"], 0);
    assert_eq!(body["limiter"]["max_concurrent"], 5);

    let metrics = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(metrics.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(metrics.into_body(), 1 << 20)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("tierdispatch_queue_depth"));
}

#[tokio::test]
async fn test_shutdown_drains_and_rejects() {
    let (state, app) = default_app();
    state.dispatcher().shutdown().await;

    let health = app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(health.status(), StatusCode::SERVICE_UNAVAILABLE);

    let response = app
        .oneshot(generate_request(json!({ "prompt": "after shutdown" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
