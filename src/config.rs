//! Configuration management for tierdispatch
//!
//! Parses TOML configuration files and provides typed access to settings.

use crate::error::{AppError, AppResult};
use crate::router::{ModelTable, Plan, TaskType, TierId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub limiter: LimiterConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    pub tiers: Vec<TierConfig>,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_request_timeout() -> u64 {
    120
}

/// Rate limiter settings
///
/// A request is admitted when fewer than
/// `max_requests_per_second + burst_allowance` requests were admitted in the
/// trailing second and fewer than `max_concurrent` are in flight.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LimiterConfig {
    #[serde(default = "default_max_rps")]
    pub max_requests_per_second: u32,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,
    /// Poll interval while waiting for a slot is `cooldown_ms / 10`
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    #[serde(default = "default_burst_allowance")]
    pub burst_allowance: u32,
    #[serde(default = "default_admission_timeout_ms")]
    pub admission_timeout_ms: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_requests_per_second: default_max_rps(),
            max_concurrent: default_max_concurrent(),
            cooldown_ms: default_cooldown_ms(),
            burst_allowance: default_burst_allowance(),
            admission_timeout_ms: default_admission_timeout_ms(),
        }
    }
}

fn default_max_rps() -> u32 {
    10
}

fn default_max_concurrent() -> u32 {
    5
}

fn default_cooldown_ms() -> u64 {
    1000
}

fn default_burst_allowance() -> u32 {
    2
}

fn default_admission_timeout_ms() -> u64 {
    30_000
}

/// Retry engine settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter_ms() -> u64 {
    500
}

/// Response cache settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default)]
    pub capacity: CacheCapacity,
    /// Subscription plan whose capacity sizes the cache at startup
    #[serde(default)]
    pub plan: Plan,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: default_cache_ttl(),
            similarity_threshold: default_similarity_threshold(),
            capacity: CacheCapacity::default(),
            plan: Plan::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_similarity_threshold() -> f64 {
    0.7
}

/// Cache capacity per subscription plan
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct CacheCapacity {
    #[serde(default = "default_free_capacity")]
    pub free: usize,
    #[serde(default = "default_pro_capacity")]
    pub pro: usize,
    #[serde(default = "default_enterprise_capacity")]
    pub enterprise: usize,
}

impl CacheCapacity {
    /// Capacity for a plan
    pub fn for_plan(&self, plan: Plan) -> usize {
        match plan {
            Plan::Free => self.free,
            Plan::Pro => self.pro,
            Plan::Enterprise => self.enterprise,
        }
    }
}

impl Default for CacheCapacity {
    fn default() -> Self {
        Self {
            free: default_free_capacity(),
            pro: default_pro_capacity(),
            enterprise: default_enterprise_capacity(),
        }
    }
}

fn default_free_capacity() -> usize {
    50
}

fn default_pro_capacity() -> usize {
    200
}

fn default_enterprise_capacity() -> usize {
    500
}

/// Dispatch queue settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct QueueConfig {
    /// Number of dispatch loops draining the queue
    ///
    /// One loop runs tasks strictly one after another. More loops run tasks
    /// side by side, still bounded by the rate limiter.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

fn default_workers() -> usize {
    1
}

/// A model provider reachable over an OpenAI-compatible HTTP API
///
/// Fields are private; configuration is loaded via deserialization and
/// checked by `Config::validate()`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ProviderConfig {
    name: String,
    base_url: String,
    /// Name of the environment variable holding the API key
    #[serde(default)]
    api_key_env: Option<String>,
    #[serde(default = "default_provider_timeout")]
    timeout_seconds: u64,
}

fn default_provider_timeout() -> u64 {
    60
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            api_key_env: None,
            timeout_seconds: default_provider_timeout(),
        }
    }

    pub fn with_api_key_env(mut self, var: impl Into<String>) -> Self {
        self.api_key_env = Some(var.into());
        self
    }

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_key_env(&self) -> Option<&str> {
        self.api_key_env.as_deref()
    }

    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds
    }
}

/// Backend tier configuration
///
/// Immutable after construction. Runtime model overrides are held by the
/// tier router, not written back here.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TierConfig {
    id: TierId,
    /// Name of the primary provider serving this tier
    endpoint: String,
    default_model: String,
    /// Additional model ids this tier serves
    #[serde(default)]
    models: Vec<String>,
    #[serde(default)]
    cost_per_request: f64,
    #[serde(default)]
    max_requests_per_day: Option<u32>,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    fallback_endpoint: Option<String>,
    #[serde(default)]
    fallback_model: Option<String>,
}

impl TierConfig {
    pub fn new(id: TierId, endpoint: impl Into<String>, default_model: impl Into<String>) -> Self {
        Self {
            id,
            endpoint: endpoint.into(),
            default_model: default_model.into(),
            models: Vec::new(),
            cost_per_request: 0.0,
            max_requests_per_day: None,
            enabled: true,
            fallback_endpoint: None,
            fallback_model: None,
        }
    }

    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.models = models.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cost(mut self, cost_per_request: f64) -> Self {
        self.cost_per_request = cost_per_request;
        self
    }

    pub fn with_daily_limit(mut self, max_requests_per_day: u32) -> Self {
        self.max_requests_per_day = Some(max_requests_per_day);
        self
    }

    pub fn with_fallback(mut self, endpoint: impl Into<String>, model: Option<String>) -> Self {
        self.fallback_endpoint = Some(endpoint.into());
        self.fallback_model = model;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn id(&self) -> TierId {
        self.id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn cost_per_request(&self) -> f64 {
        self.cost_per_request
    }

    pub fn max_requests_per_day(&self) -> Option<u32> {
        self.max_requests_per_day
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn fallback_endpoint(&self) -> Option<&str> {
        self.fallback_endpoint.as_deref()
    }

    pub fn fallback_model(&self) -> Option<&str> {
        self.fallback_model.as_deref()
    }

    /// Whether this tier serves the given model id
    pub fn serves(&self, model: &str) -> bool {
        self.default_model == model
            || self.models.iter().any(|m| m == model)
            || self.fallback_model.as_deref() == Some(model)
    }
}

/// Smart routing configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RoutingConfig {
    #[serde(default = "default_true")]
    pub smart_routing: bool,
    #[serde(default)]
    pub pro: ModelTable,
    #[serde(default)]
    pub enterprise: ModelTable,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            smart_routing: true,
            pro: ModelTable::default(),
            enterprise: ModelTable::default(),
        }
    }
}

impl RoutingConfig {
    /// Configured table for an elevated plan
    pub fn table(&self, plan: Plan) -> Option<&ModelTable> {
        match plan {
            Plan::Free => None,
            Plan::Pro => Some(&self.pro),
            Plan::Enterprise => Some(&self.enterprise),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Build a configuration from tiers alone, everything else defaulted
    pub fn with_tiers(tiers: Vec<TierConfig>) -> Self {
        Self {
            server: ServerConfig::default(),
            limiter: LimiterConfig::default(),
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            queue: QueueConfig::default(),
            providers: Vec::new(),
            tiers,
            routing: RoutingConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path_display = path.as_ref().display().to_string();

        let content =
            std::fs::read_to_string(path.as_ref()).map_err(|source| AppError::ConfigFileRead {
                path: path_display.clone(),
                source,
            })?;

        let config: Self = toml::from_str(&content).map_err(|source| {
            AppError::ConfigParseFailed {
                path: path_display.clone(),
                source,
            }
        })?;

        config
            .validate()
            .map_err(|e| AppError::ConfigValidationFailed {
                path: path_display,
                reason: e.to_string(),
            })?;

        Ok(config)
    }

    /// Look up a tier by id
    pub fn tier(&self, id: TierId) -> Option<&TierConfig> {
        self.tiers.iter().find(|t| t.id() == id)
    }

    /// Look up a provider by name
    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name() == name)
    }

    /// Validate configuration after parsing
    ///
    /// Called by `from_file()` and `from_str()`. Provider references are only
    /// checked when `[[providers]]` is non-empty, so library users can register
    /// providers programmatically instead.
    pub fn validate(&self) -> AppResult<()> {
        self.validate_limiter()?;
        self.validate_retry()?;
        self.validate_cache()?;

        if self.queue.workers == 0 {
            return Err(AppError::Config(
                "queue.workers must be greater than 0".to_string(),
            ));
        }

        if self.server.request_timeout_seconds == 0 || self.server.request_timeout_seconds > 300 {
            return Err(AppError::Config(format!(
                "server.request_timeout_seconds must be in 1..=300, got {}",
                self.server.request_timeout_seconds
            )));
        }

        let mut provider_names = HashSet::new();
        for provider in &self.providers {
            if !provider_names.insert(provider.name()) {
                return Err(AppError::Config(format!(
                    "Provider '{}' is defined more than once",
                    provider.name()
                )));
            }
            if !provider.base_url.starts_with("http://")
                && !provider.base_url.starts_with("https://")
            {
                return Err(AppError::Config(format!(
                    "Provider '{}' has invalid base_url '{}'. \
                    base_url must start with 'http://' or 'https://'.",
                    provider.name, provider.base_url
                )));
            }
            if provider.timeout_seconds == 0 || provider.timeout_seconds > 300 {
                return Err(AppError::Config(format!(
                    "Provider '{}' timeout_seconds must be in 1..=300, got {}",
                    provider.name, provider.timeout_seconds
                )));
            }
        }

        self.validate_tiers(&provider_names)?;
        self.validate_routing()?;

        Ok(())
    }

    fn validate_limiter(&self) -> AppResult<()> {
        let limiter = &self.limiter;
        if limiter.max_requests_per_second == 0 {
            return Err(AppError::Config(
                "limiter.max_requests_per_second must be greater than 0".to_string(),
            ));
        }
        if limiter.max_concurrent == 0 {
            return Err(AppError::Config(
                "limiter.max_concurrent must be greater than 0".to_string(),
            ));
        }
        if limiter.cooldown_ms == 0 {
            return Err(AppError::Config(
                "limiter.cooldown_ms must be greater than 0".to_string(),
            ));
        }
        if limiter.admission_timeout_ms == 0 {
            return Err(AppError::Config(
                "limiter.admission_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_retry(&self) -> AppResult<()> {
        let retry = &self.retry;
        if retry.max_retries == 0 {
            return Err(AppError::Config(
                "retry.max_retries must be at least 1".to_string(),
            ));
        }
        if !retry.backoff_multiplier.is_finite() || retry.backoff_multiplier < 1.0 {
            return Err(AppError::Config(format!(
                "retry.backoff_multiplier must be a finite number >= 1.0, got {}",
                retry.backoff_multiplier
            )));
        }
        if retry.max_delay_ms < retry.initial_delay_ms {
            return Err(AppError::Config(format!(
                "retry.max_delay_ms ({}) must not be smaller than retry.initial_delay_ms ({})",
                retry.max_delay_ms, retry.initial_delay_ms
            )));
        }
        Ok(())
    }

    fn validate_cache(&self) -> AppResult<()> {
        let cache = &self.cache;
        if !(cache.similarity_threshold > 0.0 && cache.similarity_threshold <= 1.0) {
            return Err(AppError::Config(format!(
                "cache.similarity_threshold must be in (0, 1], got {}",
                cache.similarity_threshold
            )));
        }
        if cache.ttl_seconds == 0 {
            return Err(AppError::Config(
                "cache.ttl_seconds must be greater than 0".to_string(),
            ));
        }
        for plan in [Plan::Free, Plan::Pro, Plan::Enterprise] {
            if cache.capacity.for_plan(plan) == 0 {
                return Err(AppError::Config(format!(
                    "cache.capacity.{} must be greater than 0",
                    plan.as_str()
                )));
            }
        }
        Ok(())
    }

    fn validate_tiers(&self, provider_names: &HashSet<&str>) -> AppResult<()> {
        let mut seen = HashSet::new();
        for tier in &self.tiers {
            if !seen.insert(tier.id) {
                return Err(AppError::Config(format!(
                    "Tier '{}' is defined more than once",
                    tier.id
                )));
            }
            if tier.default_model.trim().is_empty() {
                return Err(AppError::Config(format!(
                    "Tier '{}' has an empty default_model",
                    tier.id
                )));
            }
            if !tier.cost_per_request.is_finite() || tier.cost_per_request < 0.0 {
                return Err(AppError::Config(format!(
                    "Tier '{}' has invalid cost_per_request {}. \
                    cost_per_request must be a finite number >= 0.",
                    tier.id, tier.cost_per_request
                )));
            }
            if !provider_names.is_empty() {
                if !provider_names.contains(tier.endpoint.as_str()) {
                    return Err(AppError::Config(format!(
                        "Tier '{}' references unknown provider '{}'",
                        tier.id, tier.endpoint
                    )));
                }
                if let Some(fallback) = tier.fallback_endpoint.as_deref()
                    && !provider_names.contains(fallback)
                {
                    return Err(AppError::Config(format!(
                        "Tier '{}' references unknown fallback provider '{}'",
                        tier.id, fallback
                    )));
                }
            }
        }

        if !seen.contains(&TierId::Free) {
            return Err(AppError::Config(
                "Configuration error: no [[tiers]] entry with id = \"free\". \
                The free tier is the fallback for every plan and must exist.\n\n\
                Example fix - add to config.toml:\n\
                [[tiers]]\n\
                id = \"free\"\n\
                endpoint = \"groq\"\n\
                default_model = \"llama-3.1-8b-instant\""
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// The pro table must never name a model only the enterprise tier serves
    fn validate_routing(&self) -> AppResult<()> {
        let Some(enterprise) = self.tier(TierId::Enterprise) else {
            return Ok(());
        };
        let served_below = |model: &str| {
            self.tiers
                .iter()
                .filter(|t| t.id < TierId::Enterprise)
                .any(|t| t.serves(model))
        };

        for task in TaskType::ALL {
            if let Some(model) = self.routing.pro.resolve(Plan::Pro, task)
                && enterprise.serves(&model)
                && !served_below(&model)
            {
                return Err(AppError::Config(format!(
                    "routing.pro.{} maps to '{}', which only the enterprise tier serves",
                    task.as_str(),
                    model
                )));
            }
        }
        Ok(())
    }
}

impl FromStr for Config {
    type Err = AppError;

    fn from_str(toml_str: &str) -> Result<Self, Self::Err> {
        let config: Config =
            toml::from_str(toml_str).map_err(|source| AppError::ConfigParseFailed {
                path: "<string>".to_string(),
                source,
            })?;

        config.validate()?;
        Ok(config)
    }
}
