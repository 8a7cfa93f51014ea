//! Request dispatcher
//!
//! Owns every piece of shared state (queue, rate window, quota counters,
//! cache, usage stats) and drives a request through them:
//!
//! ```text
//! cache lookup -> enqueue(priority) -> wait_for_slot -> select tier/model
//!     -> retry(primary/fallback provider, validator) -> release_slot
//!     -> usage, quota and cache update
//! ```
//!
//! Lifecycle: [`Dispatcher::new`] constructs, [`Dispatcher::generate`] and
//! [`Dispatcher::enqueue`] serve, [`Dispatcher::shutdown`] stops accepting work
//! and waits for the queue to drain. The handle is cheap to clone.
//!
//! Dispatch loops start on demand and exit when the queue is empty. With
//! `queue.workers = 1` at most one task is between admission and completion
//! at a time; more workers run that loop N times over the same queue, still
//! bounded by the rate limiter. There is no cancellation: once queued, a task
//! runs to a result or a terminal error.

mod queue;
pub mod request;
pub mod stats;

pub use request::{GenerationRequest, GenerationResponse};
pub use stats::{DispatcherStatus, UsageStats};

use crate::cache::ResponseCache;
use crate::config::Config;
use crate::error::{AppResult, DispatchError, DispatchResult};
use crate::limiter::RateLimiter;
use crate::metrics::{LookupResult, Metrics, Outcome};
use crate::providers::ProviderRegistry;
use crate::retry::{AttemptRole, ProviderPair, RetryEngine, validators};
use crate::router::{Complexity, Plan, TierId, TierRouter};
use futures::FutureExt;
use queue::{Job, QueueState};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, Notify, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

struct Inner {
    config: Arc<Config>,
    limiter: RateLimiter,
    retry: RetryEngine,
    router: TierRouter,
    cache: AsyncMutex<ResponseCache>,
    providers: ProviderRegistry,
    metrics: Metrics,
    usage: Mutex<UsageStats>,
    queue: Mutex<QueueState>,
    shutting_down: AtomicBool,
    /// Signalled when the last dispatch loop exits
    idle: Notify,
    /// Signalled once by `shutdown` for background tasks
    shutdown_signal: Notify,
}

/// Priority-queued, rate-limited, tier-routed request dispatcher
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("providers", &self.inner.providers)
            .field("router", &self.inner.router)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Construct a dispatcher with the given providers
    pub fn new(config: Arc<Config>, providers: ProviderRegistry, metrics: Metrics) -> Self {
        let router = TierRouter::new(&config);
        Self::with_router(config, providers, metrics, router)
    }

    /// Construct a dispatcher with a preconfigured tier router
    pub fn with_router(
        config: Arc<Config>,
        providers: ProviderRegistry,
        metrics: Metrics,
        router: TierRouter,
    ) -> Self {
        tracing::info!(
            providers = providers.len(),
            tiers = config.tiers.len(),
            workers = config.queue.workers,
            cache_enabled = config.cache.enabled,
            cache_plan = config.cache.plan.as_str(),
            "Creating dispatcher"
        );

        let inner = Inner {
            limiter: RateLimiter::new(config.limiter.clone()),
            retry: RetryEngine::new(config.retry.clone()),
            cache: AsyncMutex::new(ResponseCache::new(&config.cache)),
            router,
            providers,
            metrics,
            usage: Mutex::new(UsageStats::default()),
            queue: Mutex::new(QueueState::default()),
            shutting_down: AtomicBool::new(false),
            idle: Notify::new(),
            shutdown_signal: Notify::new(),
            config,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Construct a dispatcher with HTTP adapters for every configured provider
    ///
    /// # Errors
    /// Returns `AppError::Config` if an adapter cannot be built.
    pub fn from_config(config: Arc<Config>, metrics: Metrics) -> AppResult<Self> {
        let providers = ProviderRegistry::from_config(&config)?;
        Ok(Self::new(config, providers, metrics))
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn router(&self) -> &TierRouter {
        &self.inner.router
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.inner.limiter
    }

    pub fn retry(&self) -> &RetryEngine {
        &self.inner.retry
    }

    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Queue a task and wait for its result
    ///
    /// Higher `priority` runs first; equal priorities run in enqueue order.
    /// The task starts only after the rate limiter grants a slot, and the slot
    /// is released when it finishes. A failing or panicking task is logged and
    /// does not affect other queued tasks.
    ///
    /// # Errors
    /// `ShuttingDown` after [`shutdown`](Self::shutdown), `RateLimitTimeout`
    /// when no slot was granted in time, `TaskDropped` if the task panicked,
    /// otherwise whatever the task returned.
    pub async fn enqueue<T, Fut>(&self, priority: i32, task: Fut) -> DispatchResult<T>
    where
        T: Send + 'static,
        Fut: Future<Output = DispatchResult<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move |admission: DispatchResult<()>| {
            async move {
                let result = match admission {
                    Ok(()) => match AssertUnwindSafe(task).catch_unwind().await {
                        Ok(result) => result,
                        Err(_) => {
                            tracing::error!(priority = priority, "Queued task panicked");
                            Err(DispatchError::TaskDropped)
                        }
                    },
                    Err(e) => {
                        // Never polled: release whatever the task owns first
                        drop(task);
                        Err(e)
                    }
                };
                if let Err(e) = &result {
                    tracing::warn!(priority = priority, error = %e, "Queued task failed");
                }
                // The caller may have stopped waiting
                let _ = tx.send(result);
            }
            .boxed()
        });

        let (depth, start_loop) = {
            let mut queue = self.inner.lock_queue();
            if self.is_shutting_down() {
                return Err(DispatchError::ShuttingDown);
            }
            let sequence = queue.push(priority, job);
            let start_loop = queue.running_loops < self.inner.config.queue.workers;
            if start_loop {
                queue.running_loops += 1;
            }
            tracing::debug!(
                priority = priority,
                sequence = sequence,
                queue_depth = queue.len(),
                "Task enqueued"
            );
            (queue.len(), start_loop)
        };
        self.inner.metrics.set_queue_depth(depth);

        if start_loop {
            tokio::spawn(Inner::dispatch_loop(Arc::clone(&self.inner)));
        }

        rx.await.map_err(|_| DispatchError::TaskDropped)?
    }

    /// Serve a generation request
    ///
    /// Similar cached responses are returned without queueing. Otherwise the
    /// request is queued at its priority and, once admitted, routed to a tier
    /// and model and executed with retry and primary/fallback alternation.
    ///
    /// Worst-case latency is the admission timeout plus the sum of all retry
    /// backoff delays plus every provider call.
    ///
    /// # Errors
    /// `RateLimitTimeout` or `RetriesExhausted` in normal operation;
    /// `ProviderNotConfigured` on misconfiguration; `ShuttingDown` after
    /// shutdown.
    pub async fn generate(&self, request: GenerationRequest) -> DispatchResult<GenerationResponse> {
        if self.is_shutting_down() {
            return Err(DispatchError::ShuttingDown);
        }

        let started = Instant::now();
        let use_cache = self.inner.config.cache.enabled && request.use_cache();

        if use_cache && let Some(hit) = self.inner.lookup_cache(&request, started).await {
            return Ok(hit);
        }

        let complexity = request.complexity();
        let priority = request.priority();
        let inner = Arc::clone(&self.inner);
        let outcome = UsageRecorder::new(Arc::clone(&self.inner), started);

        // Bookkeeping lives in the task so it happens even if the caller
        // stops waiting
        self.enqueue(priority, async move {
            let mut response = inner.execute(&request, complexity).await?;
            if use_cache {
                inner
                    .cache
                    .lock()
                    .await
                    .set(request.prompt(), response.content.clone(), complexity);
            }
            response.latency_ms = outcome.success();
            Ok(response)
        })
        .await
    }

    /// Point-in-time view of queue, limiter, retry, quota, usage and cache
    pub async fn status(&self) -> DispatcherStatus {
        let limiter = self.inner.limiter.snapshot().await;
        let cache = self.inner.cache.lock().await.stats();
        let (queue_depth, dispatch_loops) = {
            let queue = self.inner.lock_queue();
            (queue.len(), queue.running_loops)
        };
        let usage = self.inner.lock_usage().clone();

        DispatcherStatus {
            queue_depth,
            dispatch_loops,
            shutting_down: self.is_shutting_down(),
            limiter,
            retry: self.inner.retry.stats(),
            quota: self.inner.router.quota_snapshot(),
            usage,
            cache,
        }
    }

    /// Resize the response cache for a subscription plan
    ///
    /// The startup size comes from `cache.plan`; shrinking evicts the oldest
    /// entries.
    pub async fn set_cache_tier(&self, plan: Plan) {
        let mut cache = self.inner.cache.lock().await;
        cache.set_tier(plan);
        tracing::info!(
            plan = plan.as_str(),
            capacity = cache.capacity(),
            "Response cache resized"
        );
    }

    /// Zero usage and retry statistics
    ///
    /// Tier quotas reset themselves when the calendar date changes.
    pub fn reset_daily(&self) {
        *self.inner.lock_usage() = UsageStats::default();
        self.inner.retry.reset_stats();
        tracing::info!("Daily usage and retry statistics reset");
    }

    /// Run cache cleanup every `every` until shutdown
    pub fn spawn_cache_janitor(&self, every: Duration) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let every = every.max(Duration::from_millis(1));

        tokio::spawn(async move {
            tracing::info!(
                interval_ms = every.as_millis() as u64,
                "Starting cache janitor"
            );
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                // Register for the shutdown notification before reading the flag
                let stop = inner.shutdown_signal.notified();
                tokio::pin!(stop);
                stop.as_mut().enable();
                if inner.shutting_down.load(Ordering::SeqCst) {
                    break;
                }
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = &mut stop => break,
                }
                let removed = inner.cache.lock().await.cleanup();
                tracing::debug!(removed = removed, "Cache janitor pass complete");
            }

            tracing::info!("Cache janitor stopped");
        })
    }

    /// Stop accepting work and wait until every queued task has finished
    ///
    /// New `enqueue`/`generate` calls fail with `ShuttingDown`. Calling this
    /// more than once is harmless.
    pub async fn shutdown(&self) {
        if !self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            let depth = self.inner.lock_queue().len();
            tracing::info!(queue_depth = depth, "Dispatcher shutting down, draining queue");
        }
        self.inner.shutdown_signal.notify_waiters();

        loop {
            let idle = self.inner.idle.notified();
            {
                let queue = self.inner.lock_queue();
                if queue.is_empty() && queue.running_loops == 0 {
                    break;
                }
            }
            idle.await;
        }

        tracing::info!("Dispatcher drained");
    }
}

/// Records one generation in `UsageStats`
///
/// Counts a failure when dropped before [`success`](Self::success), which
/// covers task errors, panics and tasks never admitted by the limiter.
struct UsageRecorder {
    inner: Arc<Inner>,
    started: Instant,
    done: bool,
}

impl UsageRecorder {
    fn new(inner: Arc<Inner>, started: Instant) -> Self {
        Self {
            inner,
            started,
            done: false,
        }
    }

    /// Record a success and return the latency in milliseconds
    fn success(mut self) -> u64 {
        self.done = true;
        let latency_ms = elapsed_ms(self.started);
        self.inner.lock_usage().record_success(latency_ms);
        latency_ms
    }
}

impl Drop for UsageRecorder {
    fn drop(&mut self) {
        if !self.done {
            let latency_ms = elapsed_ms(self.started);
            self.inner.lock_usage().record_failure(latency_ms);
        }
    }
}

impl Inner {
    fn lock_queue(&self) -> MutexGuard<'_, QueueState> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_usage(&self) -> MutexGuard<'_, UsageStats> {
        self.usage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pop and run tasks until the queue is empty
    async fn dispatch_loop(self: Arc<Self>) {
        tracing::debug!("Dispatch loop started");

        loop {
            let next = {
                let mut queue = self.lock_queue();
                match queue.pop() {
                    Some(task) => {
                        self.metrics.set_queue_depth(queue.len());
                        task
                    }
                    None => {
                        queue.running_loops = queue.running_loops.saturating_sub(1);
                        let idle = queue.running_loops == 0;
                        drop(queue);
                        if idle {
                            self.idle.notify_waiters();
                        }
                        tracing::debug!("Dispatch queue empty, loop exiting");
                        return;
                    }
                }
            };

            tracing::debug!(
                priority = next.priority,
                sequence = next.sequence,
                queued_ms = elapsed_ms(next.enqueued_at),
                "Dispatching task"
            );

            match self.limiter.wait_for_slot().await {
                Ok(()) => {
                    (next.job)(Ok(())).await;
                    self.limiter.release_slot().await;
                }
                Err(e) => {
                    self.metrics.rate_limit_timeout();
                    tracing::warn!(
                        priority = next.priority,
                        error = %e,
                        "Rate limiter admission timed out"
                    );
                    (next.job)(Err(e)).await;
                }
            }
        }
    }

    async fn lookup_cache(
        &self,
        request: &GenerationRequest,
        started: Instant,
    ) -> Option<GenerationResponse> {
        let found = {
            let mut cache = self.cache.lock().await;
            let threshold = cache.threshold();
            cache.find_similar(request.prompt(), threshold)
        };

        let Some(hit) = found else {
            self.lock_usage().cache_misses += 1;
            self.record_metric("record_cache_lookup", |m| {
                m.record_cache_lookup(LookupResult::Miss)
            });
            return None;
        };

        self.lock_usage().cache_hits += 1;
        self.record_metric("record_cache_lookup", |m| {
            m.record_cache_lookup(LookupResult::Hit)
        });
        tracing::info!(
            similarity = hit.similarity,
            plan = request.plan().as_str(),
            "Serving response from cache"
        );

        Some(GenerationResponse {
            content: hit.entry.response().to_string(),
            tier: None,
            model: None,
            model_source: None,
            cached: true,
            similarity: Some(hit.similarity),
            attempts: 0,
            latency_ms: elapsed_ms(started),
        })
    }

    /// Route and execute an admitted request
    async fn execute(
        &self,
        request: &GenerationRequest,
        complexity: Complexity,
    ) -> DispatchResult<GenerationResponse> {
        let admitted = Instant::now();
        let plan = request.plan();
        let tier = self.router.select_tier_for_model(
            complexity,
            request.preferred_tier(),
            plan,
            request.model(),
        );
        let task = request.task_type();
        let choice = self
            .router
            .resolve_model(tier, plan, Some(task), request.model());

        tracing::debug!(
            tier = %tier,
            model = %choice.model,
            model_source = ?choice.source,
            plan = plan.as_str(),
            complexity = ?complexity,
            task_type = task.as_str(),
            "Request routed"
        );

        let (pair, cost) = match self.provider_pair(tier, &choice.model) {
            Ok((pair, cost)) => {
                tracing::debug!(
                    tier = %pair.tier(),
                    has_fallback = pair.has_fallback(),
                    cost_per_attempt = cost,
                    "Provider pair ready"
                );
                (pair, cost)
            }
            Err(e) => {
                tracing::error!(tier = %tier, error = %e, "Cannot build provider pair");
                self.record_metric("record_request", |m| {
                    m.record_request(tier, Outcome::Failure)
                });
                return Err(e);
            }
        };

        let messages = request.messages();
        let options = request.options();
        let validator = request
            .validator()
            .cloned()
            .unwrap_or_else(validators::non_empty);
        let accept = |response: &String| validator(response.as_str());
        let accept: &(dyn Fn(&String) -> bool + Sync) = &accept;

        let mut attempts = 0;
        let result = self
            .retry
            .execute(
                |attempt| {
                    attempts = attempt;
                    let pair = &pair;
                    let messages = &messages;
                    async move {
                        let route = pair.for_attempt(attempt)?;
                        tracing::debug!(
                            tier = %tier,
                            provider = route.provider.name(),
                            model = route.model,
                            role = route.role.as_str(),
                            attempt = attempt,
                            "Invoking provider"
                        );
                        let outcome = route.provider.invoke(messages, route.model, options).await;
                        self.record_attempt(tier, route.role, cost);
                        outcome.map_err(|e| DispatchError::ProviderTransient {
                            provider: route.provider.name().to_string(),
                            reason: e.to_string(),
                        })
                    }
                },
                Some(accept),
            )
            .await;

        let duration_ms = admitted.elapsed().as_secs_f64() * 1000.0;
        self.record_metric("record_request_duration", |m| {
            m.record_request_duration(tier, duration_ms)
        });

        match result {
            Ok(content) => {
                self.record_metric("record_request", |m| {
                    m.record_request(tier, Outcome::Success)
                });
                tracing::info!(
                    tier = %tier,
                    model = %choice.model,
                    attempts = attempts,
                    duration_ms = duration_ms as u64,
                    "Generation succeeded"
                );
                Ok(GenerationResponse {
                    content,
                    tier: Some(tier),
                    model: Some(choice.model),
                    model_source: Some(choice.source),
                    cached: false,
                    similarity: None,
                    attempts,
                    latency_ms: 0,
                })
            }
            Err(e) => {
                self.record_metric("record_request", |m| {
                    m.record_request(tier, Outcome::Failure)
                });
                tracing::error!(
                    tier = %tier,
                    model = %choice.model,
                    attempts = attempts,
                    error = %e,
                    "Generation failed"
                );
                Err(e)
            }
        }
    }

    /// Primary/fallback providers and per-attempt cost for a tier
    fn provider_pair(&self, tier: TierId, model: &str) -> DispatchResult<(ProviderPair, f64)> {
        let config = self
            .router
            .tier(tier)
            .or_else(|| self.router.tier(TierId::Free))
            .ok_or_else(|| DispatchError::ProviderNotConfigured(format!("<tier {tier}>")))?;

        let primary = self
            .providers
            .get(config.endpoint())
            .ok_or_else(|| DispatchError::ProviderNotConfigured(config.endpoint().to_string()))?;
        let mut pair = ProviderPair::new(tier, primary, model);

        if let Some(name) = config.fallback_endpoint() {
            let fallback = self
                .providers
                .get(name)
                .ok_or_else(|| DispatchError::ProviderNotConfigured(name.to_string()))?;
            pair = pair.with_fallback(fallback, config.fallback_model().unwrap_or(model));
        }

        Ok((pair, config.cost_per_request()))
    }

    /// Account for one attempt that reached a provider
    fn record_attempt(&self, tier: TierId, role: AttemptRole, cost: f64) {
        self.router.track_usage(tier);
        self.lock_usage().add_cost(cost);
        self.record_metric("record_attempt", |m| m.record_attempt(tier, role));
    }

    fn record_metric(
        &self,
        operation: &str,
        record: impl FnOnce(&Metrics) -> Result<(), prometheus::Error>,
    ) {
        if let Err(e) = record(&self.metrics) {
            tracing::error!(
                operation = operation,
                error = %e,
                "Metrics recording failed (non-fatal)"
            );
            self.metrics.metrics_recording_failure(operation);
        }
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}
