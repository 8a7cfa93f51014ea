//! End-to-end dispatcher tests with in-process providers
//!
//! Providers are scripted per call number so retry, failover, quota and cost
//! accounting can be checked without any network.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tierdispatch::config::{Config, TierConfig};
use tierdispatch::dispatcher::{Dispatcher, GenerationRequest};
use tierdispatch::error::DispatchError;
use tierdispatch::metrics::Metrics;
use tierdispatch::providers::{
    ChatMessage, InvokeOptions, Provider, ProviderError, ProviderRegistry,
};
use tierdispatch::retry::validators;
use tierdispatch::router::{Complexity, ModelSource, Plan, TaskType, TierId};
use tokio_test::{assert_err, assert_ok};

type Script = Box<dyn Fn(u32) -> Result<String, ProviderError> + Send + Sync>;

struct ScriptedProvider {
    name: &'static str,
    script: Script,
    calls: AtomicU32,
    models: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    fn new(
        name: &'static str,
        script: impl Fn(u32) -> Result<String, ProviderError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            script: Box::new(script),
            calls: AtomicU32::new(0),
            models: Mutex::new(Vec::new()),
        })
    }

    fn answering(name: &'static str, text: &'static str) -> Arc<Self> {
        Self::new(name, move |_| Ok(text.to_string()))
    }

    fn failing(name: &'static str) -> Arc<Self> {
        Self::new(name, |_| {
            Err(ProviderError::Http {
                status: 500,
                body: "upstream error".to_string(),
            })
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn models(&self) -> Vec<String> {
        self.models.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn invoke(
        &self,
        _messages: &[ChatMessage],
        model: &str,
        _options: &InvokeOptions,
    ) -> Result<String, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.models.lock().unwrap().push(model.to_string());
        (self.script)(call)
    }
}

fn config() -> Config {
    let mut config = Config::with_tiers(vec![
        TierConfig::new(TierId::Free, "primary", "small-model")
            .with_cost(0.001)
            .with_fallback("backup", Some("backup-model".to_string())),
        TierConfig::new(TierId::Pro, "primary", "big-model")
            .with_models(["qwen-2.5-coder-32b"])
            .with_cost(0.01),
    ]);
    config.retry.initial_delay_ms = 100;
    config.retry.jitter_ms = 0;
    config.retry.max_retries = 3;
    config.routing.pro.code = Some("qwen-2.5-coder-32b".to_string());
    config
}

fn dispatcher(config: Config, providers: &[Arc<ScriptedProvider>]) -> Dispatcher {
    let mut registry = ProviderRegistry::new();
    for provider in providers {
        registry.register(provider.clone());
    }
    Dispatcher::new(Arc::new(config), registry, Metrics::new().unwrap())
}

#[tokio::test(start_paused = true)]
async fn test_generate_routes_free_request_to_primary() {
    let primary = ScriptedProvider::answering("primary", "Here is your answer.");
    let backup = ScriptedProvider::failing("backup");
    let dispatcher = dispatcher(config(), &[primary.clone(), backup.clone()]);

    let response = assert_ok!(
        dispatcher
            .generate(GenerationRequest::new("Tell me a fun fact about owls", Plan::Free))
            .await
    );

    assert_eq!(response.content, "Here is your answer.");
    assert_eq!(response.tier, Some(TierId::Free));
    assert_eq!(response.model.as_deref(), Some("small-model"));
    assert_eq!(response.model_source, Some(ModelSource::TierDefault));
    assert_eq!(response.attempts, 1);
    assert!(!response.cached);
    assert_eq!(primary.calls(), 1);
    assert_eq!(backup.calls(), 0);

    let status = dispatcher.status().await;
    assert_eq!(status.usage.total_requests, 1);
    assert_eq!(status.usage.successful_requests, 1);
    assert_eq!(status.usage.cache_misses, 1);
    assert!((status.usage.cost_to_date - 0.001).abs() < 1e-12);
    assert_eq!(dispatcher.router().usage(TierId::Free), 1);
    assert_eq!(status.limiter.active, 0);
    assert_eq!(status.cache.size, 1);

    let exposition = dispatcher.metrics().gather().unwrap();
    assert!(exposition.contains("tierdispatch_requests_total"));
    assert!(exposition.contains(r#"outcome="success""#));
    assert!(exposition.contains(r#"role="primary""#));
}

#[tokio::test(start_paused = true)]
async fn test_repeated_prompt_is_served_from_cache() {
    let primary = ScriptedProvider::answering("primary", "Owls can rotate their heads.");
    let backup = ScriptedProvider::failing("backup");
    let dispatcher = dispatcher(config(), &[primary.clone(), backup]);

    let prompt = "Tell me a fun fact about owls";
    assert_ok!(dispatcher.generate(GenerationRequest::new(prompt, Plan::Free)).await);

    let cached = assert_ok!(
        dispatcher
            .generate(GenerationRequest::new("tell me a FUN fact about owls!", Plan::Free))
            .await
    );
    assert!(cached.cached);
    assert_eq!(cached.similarity, Some(1.0));
    assert_eq!(cached.attempts, 0);
    assert_eq!(cached.tier, None);
    assert_eq!(cached.content, "Owls can rotate their heads.");
    assert_eq!(primary.calls(), 1);

    let bypass = assert_ok!(
        dispatcher
            .generate(GenerationRequest::new(prompt, Plan::Free).without_cache())
            .await
    );
    assert!(!bypass.cached);
    assert_eq!(primary.calls(), 2);

    let usage = dispatcher.status().await.usage;
    assert_eq!(usage.cache_hits, 1);
    assert_eq!(usage.cache_misses, 1);
}

#[tokio::test(start_paused = true)]
async fn test_failing_primary_fails_over_to_backup() {
    let primary = ScriptedProvider::failing("primary");
    let backup = ScriptedProvider::answering("backup", "Backup says hello.");
    let dispatcher = dispatcher(config(), &[primary.clone(), backup.clone()]);

    let response = assert_ok!(
        dispatcher
            .generate(GenerationRequest::new("Say hello", Plan::Free))
            .await
    );

    assert_eq!(response.content, "Backup says hello.");
    assert_eq!(response.attempts, 2);
    assert_eq!(primary.models(), vec!["small-model"]);
    assert_eq!(backup.models(), vec!["backup-model"]);

    // Both attempts reached a provider
    assert_eq!(dispatcher.router().usage(TierId::Free), 2);
    let usage = dispatcher.status().await.usage;
    assert!((usage.cost_to_date - 0.002).abs() < 1e-12);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_are_reported_and_not_cached() {
    let primary = ScriptedProvider::failing("primary");
    let backup = ScriptedProvider::failing("backup");
    let dispatcher = dispatcher(config(), &[primary.clone(), backup.clone()]);

    let err = assert_err!(
        dispatcher
            .generate(GenerationRequest::new("Say hello", Plan::Free))
            .await
    );
    match err {
        DispatchError::RetriesExhausted { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
    assert_eq!(primary.calls(), 2);
    assert_eq!(backup.calls(), 1);

    let status = dispatcher.status().await;
    assert_eq!(status.usage.failed_requests, 1);
    assert_eq!(status.cache.size, 0);
    assert_eq!(status.retry.failed_retries, 1);
    assert_eq!(status.limiter.active, 0);
}

#[tokio::test(start_paused = true)]
async fn test_validator_rejects_refusals_until_real_answer() {
    let primary = ScriptedProvider::new("primary", |call| {
        if call == 1 {
            Ok("I cannot help with that request.".to_string())
        } else {
            Ok("A navbar needs a logo, links and a menu toggle.".to_string())
        }
    });
    let mut config = config();
    config.tiers = vec![TierConfig::new(TierId::Free, "primary", "small-model")];
    let dispatcher = dispatcher(config, &[primary.clone()]);

    let response = assert_ok!(
        dispatcher
            .generate(
                GenerationRequest::new("Describe a navbar", Plan::Free)
                    .with_validator(validators::quality(20)),
            )
            .await
    );

    // attempt 1 refused, attempt 2 had no fallback, attempt 3 answered
    assert_eq!(response.attempts, 3);
    assert_eq!(primary.calls(), 2);
    assert!(response.content.starts_with("A navbar"));
}

#[tokio::test(start_paused = true)]
async fn test_pro_plan_heavy_code_task_uses_smart_routing() {
    let primary = ScriptedProvider::answering("primary", "fn main() {}");
    let backup = ScriptedProvider::failing("backup");
    let dispatcher = dispatcher(config(), &[primary.clone(), backup]);

    let response = assert_ok!(
        dispatcher
            .generate(
                GenerationRequest::new("Write the code", Plan::Pro)
                    .with_complexity(Complexity::Heavy)
                    .with_task_type(TaskType::Code),
            )
            .await
    );

    assert_eq!(response.tier, Some(TierId::Pro));
    assert_eq!(response.model.as_deref(), Some("qwen-2.5-coder-32b"));
    assert_eq!(response.model_source, Some(ModelSource::SmartRouting));
    assert_eq!(dispatcher.router().usage(TierId::Pro), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unregistered_provider_is_a_configuration_error() {
    let backup = ScriptedProvider::answering("backup", "unused");
    let dispatcher = dispatcher(config(), &[backup.clone()]);

    let err = assert_err!(
        dispatcher
            .generate(GenerationRequest::new("hello there", Plan::Free))
            .await
    );
    assert_eq!(err, DispatchError::ProviderNotConfigured("primary".to_string()));
    assert_eq!(backup.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_timeout_reaches_caller() {
    let primary = ScriptedProvider::answering("primary", "ok");
    let mut config = config();
    config.limiter.max_concurrent = 1;
    config.limiter.admission_timeout_ms = 300;
    let dispatcher = dispatcher(config, &[primary.clone()]);

    // Hold the only slot
    dispatcher.limiter().wait_for_slot().await.unwrap();

    let err = assert_err!(
        dispatcher
            .generate(GenerationRequest::new("hello there", Plan::Free))
            .await
    );
    assert!(matches!(err, DispatchError::RateLimitTimeout { .. }));
    assert_eq!(primary.calls(), 0);
    assert_eq!(dispatcher.metrics().rate_limit_timeouts_count(), 1);

    dispatcher.limiter().release_slot().await;
    assert_ok!(
        dispatcher
            .generate(GenerationRequest::new("hello again", Plan::Free))
            .await
    );
}

#[tokio::test(start_paused = true)]
async fn test_reset_daily_zeroes_usage_and_retry_stats() {
    let primary = ScriptedProvider::answering("primary", "ok");
    let dispatcher = dispatcher(config(), &[primary]);

    assert_ok!(
        dispatcher
            .generate(GenerationRequest::new("first prompt here", Plan::Free))
            .await
    );
    assert_eq!(dispatcher.status().await.usage.total_requests, 1);

    dispatcher.reset_daily();

    let status = dispatcher.status().await;
    assert_eq!(status.usage.total_requests, 0);
    assert_eq!(status.usage.cost_to_date, 0.0);
    assert_eq!(status.retry.total_attempts, 0);
    // Quota counters follow the calendar, not reset_daily
    assert_eq!(dispatcher.router().usage(TierId::Free), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cache_janitor_purges_expired_entries_until_shutdown() {
    let primary = ScriptedProvider::answering("primary", "ok");
    let mut config = config();
    config.cache.ttl_seconds = 1;
    let dispatcher = dispatcher(config, &[primary]);
    let janitor = dispatcher.spawn_cache_janitor(Duration::from_millis(500));

    assert_ok!(
        dispatcher
            .generate(GenerationRequest::new("cache me please", Plan::Free))
            .await
    );
    assert_eq!(dispatcher.status().await.cache.size, 1);

    tokio::time::sleep(Duration::from_millis(1600)).await;
    assert_eq!(dispatcher.status().await.cache.size, 0);

    dispatcher.shutdown().await;
    tokio::time::timeout(Duration::from_secs(1), janitor)
        .await
        .expect("janitor stops on shutdown")
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_rejects_new_requests() {
    let primary = ScriptedProvider::answering("primary", "ok");
    let dispatcher = dispatcher(config(), &[primary.clone()]);

    dispatcher.shutdown().await;

    let err = assert_err!(
        dispatcher
            .generate(GenerationRequest::new("too late", Plan::Free))
            .await
    );
    assert_eq!(err, DispatchError::ShuttingDown);
    assert_eq!(primary.calls(), 0);
    assert!(dispatcher.status().await.shutting_down);
}

#[tokio::test(start_paused = true)]
async fn test_requested_pro_model_is_billed_to_pro_tier_until_quota_runs_out() {
    let primary = ScriptedProvider::answering("primary", "Here you go.");
    let backup = ScriptedProvider::failing("backup");
    let mut config = config();
    config.tiers[1] = TierConfig::new(TierId::Pro, "primary", "big-model")
        .with_cost(0.01)
        .with_daily_limit(1);
    let dispatcher = dispatcher(config, &[primary.clone(), backup]);

    let mut served = Vec::new();
    for _ in 0..3 {
        let response = assert_ok!(
            dispatcher
                .generate(
                    GenerationRequest::new("Summarize this paragraph", Plan::Pro)
                        .with_complexity(Complexity::Light)
                        .with_model("big-model")
                        .without_cache(),
                )
                .await
        );
        served.push((response.tier, response.model, response.model_source));
    }

    assert_eq!(
        served[0],
        (
            Some(TierId::Pro),
            Some("big-model".to_string()),
            Some(ModelSource::Explicit)
        )
    );
    for later in &served[1..] {
        assert_eq!(
            *later,
            (
                Some(TierId::Free),
                Some("small-model".to_string()),
                Some(ModelSource::TierDefault)
            )
        );
    }
    assert_eq!(primary.models(), vec!["big-model", "small-model", "small-model"]);
    assert_eq!(dispatcher.router().usage(TierId::Pro), 1);
    assert_eq!(dispatcher.router().usage(TierId::Free), 2);

    let usage = dispatcher.status().await.usage;
    assert!((usage.cost_to_date - 0.012).abs() < 1e-12);
}

#[tokio::test(start_paused = true)]
async fn test_cache_tier_controls_capacity_and_eviction() {
    let primary = ScriptedProvider::answering("primary", "ok");
    let mut config = config();
    config.cache.capacity.free = 2;
    config.cache.capacity.enterprise = 4;
    let dispatcher = dispatcher(config, &[primary]);

    let prompts = [
        "alpha bravo charlie",
        "delta echo foxtrot",
        "golf hotel india",
        "juliet kilo lima",
        "mike november oscar",
    ];

    for prompt in &prompts[..3] {
        assert_ok!(dispatcher.generate(GenerationRequest::new(*prompt, Plan::Free)).await);
    }
    let cache = dispatcher.status().await.cache;
    assert_eq!(cache.capacity, 2);
    assert_eq!(cache.size, 2);

    dispatcher.set_cache_tier(Plan::Enterprise).await;
    for prompt in &prompts[3..] {
        assert_ok!(dispatcher.generate(GenerationRequest::new(*prompt, Plan::Free)).await);
    }
    let cache = dispatcher.status().await.cache;
    assert_eq!(cache.capacity, 4);
    assert_eq!(cache.size, 4);

    // Shrinking drops the oldest entries
    dispatcher.set_cache_tier(Plan::Free).await;
    let cache = dispatcher.status().await.cache;
    assert_eq!(cache.capacity, 2);
    assert_eq!(cache.size, 2);
}

#[tokio::test(start_paused = true)]
async fn test_configured_cache_plan_sizes_cache_at_startup() {
    let primary = ScriptedProvider::answering("primary", "ok");
    let mut config = config();
    config.cache.plan = Plan::Pro;
    let dispatcher = dispatcher(config, &[primary]);

    assert_eq!(dispatcher.status().await.cache.capacity, 200);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_request_is_still_counted_and_cached() {
    let primary = ScriptedProvider::answering("primary", "Late but complete.");
    let dispatcher = dispatcher(config(), &[primary.clone()]);

    let blocker = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            dispatcher
                .enqueue(10, async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok::<_, DispatchError>(())
                })
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let waited = tokio::time::timeout(
        Duration::from_secs(1),
        dispatcher.generate(GenerationRequest::new("Tell me about herons", Plan::Free)),
    )
    .await;
    assert!(waited.is_err(), "caller gives up while the request is queued");

    assert_ok!(blocker.await.unwrap());
    dispatcher.shutdown().await;

    assert_eq!(primary.calls(), 1);
    let status = dispatcher.status().await;
    assert_eq!(status.usage.total_requests, 1);
    assert_eq!(status.usage.successful_requests, 1);
    assert!((status.usage.cost_to_date - 0.001).abs() < 1e-12);
    assert_eq!(status.cache.size, 1);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_timeout_counts_as_failed_request() {
    let primary = ScriptedProvider::answering("primary", "ok");
    let mut config = config();
    config.limiter.max_concurrent = 1;
    config.limiter.admission_timeout_ms = 300;
    let dispatcher = dispatcher(config, &[primary]);

    dispatcher.limiter().wait_for_slot().await.unwrap();
    assert_err!(
        dispatcher
            .generate(GenerationRequest::new("no slot for me", Plan::Free))
            .await
    );

    let usage = dispatcher.status().await.usage;
    assert_eq!(usage.total_requests, 1);
    assert_eq!(usage.failed_requests, 1);
}
