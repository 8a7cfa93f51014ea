//! Generation endpoint handler
//!
//! Handles POST /v1/generate. The caller's subscription plan is taken from the
//! request body as-is; resolving it from credentials is the job of whatever
//! sits in front of this service.

use crate::dispatcher::{GenerationRequest, GenerationResponse};
use crate::error::AppError;
use crate::handlers::AppState;
use crate::middleware::RequestId;
use crate::providers::InvokeOptions;
use crate::retry::validators;
use crate::router::{Complexity, Plan, TaskType, TierId};
use axum::{Extension, Json, extract::State};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

/// Maximum allowed prompt length in characters
const MAX_PROMPT_LENGTH: usize = 100_000;

/// Upper bound for the caller-requested minimum response length
const MAX_MIN_LENGTH: usize = 10_000;

/// Generation request from a client
///
/// Validation is enforced during deserialization - invalid instances cannot exist.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    prompt: String,
    system_prompt: Option<String>,
    plan: Plan,
    complexity: Option<Complexity>,
    task_type: Option<TaskType>,
    preferred_tier: Option<TierId>,
    model: Option<String>,
    priority: Option<i32>,
    temperature: Option<f64>,
    max_tokens: Option<u32>,
    min_length: Option<usize>,
    use_cache: bool,
}

impl GenerateRequest {
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn plan(&self) -> Plan {
        self.plan
    }

    /// Convert into a dispatcher request
    ///
    /// A requested priority is capped at the plan's default, so clients can
    /// lower their priority but not jump ahead of higher plans.
    pub fn into_generation_request(self) -> GenerationRequest {
        let plan = self.plan;
        let mut request = GenerationRequest::new(self.prompt, plan).with_options(InvokeOptions {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        });

        if let Some(system) = self.system_prompt {
            request = request.with_system_prompt(system);
        }
        if let Some(complexity) = self.complexity {
            request = request.with_complexity(complexity);
        }
        if let Some(task_type) = self.task_type {
            request = request.with_task_type(task_type);
        }
        if let Some(tier) = self.preferred_tier {
            request = request.with_preferred_tier(tier);
        }
        if let Some(model) = self.model {
            request = request.with_model(model);
        }
        if let Some(priority) = self.priority {
            request = request.with_priority(priority.min(plan.default_priority()));
        }
        if let Some(min_length) = self.min_length {
            request = request.with_validator(validators::quality(min_length));
        }
        if !self.use_cache {
            request = request.without_cache();
        }
        request
    }
}

impl<'de> Deserialize<'de> for GenerateRequest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct RawGenerateRequest {
            prompt: String,
            #[serde(default)]
            system_prompt: Option<String>,
            #[serde(default)]
            plan: Plan,
            #[serde(default)]
            complexity: Option<Complexity>,
            #[serde(default)]
            task_type: Option<TaskType>,
            #[serde(default)]
            preferred_tier: Option<TierId>,
            #[serde(default)]
            model: Option<String>,
            #[serde(default)]
            priority: Option<i32>,
            #[serde(default)]
            temperature: Option<f64>,
            #[serde(default)]
            max_tokens: Option<u32>,
            #[serde(default)]
            min_length: Option<usize>,
            #[serde(default = "default_use_cache")]
            use_cache: bool,
        }

        fn default_use_cache() -> bool {
            true
        }

        let raw = RawGenerateRequest::deserialize(deserializer)?;

        if raw.prompt.trim().is_empty() {
            return Err(serde::de::Error::custom(
                "prompt cannot be empty or contain only whitespace",
            ));
        }

        let prompt_chars = raw.prompt.chars().count();
        if prompt_chars > MAX_PROMPT_LENGTH {
            return Err(serde::de::Error::custom(format!(
                "prompt exceeds maximum length of {} characters (got {})",
                MAX_PROMPT_LENGTH, prompt_chars
            )));
        }

        if let Some(system) = &raw.system_prompt
            && system.chars().count() > MAX_PROMPT_LENGTH
        {
            return Err(serde::de::Error::custom(format!(
                "system_prompt exceeds maximum length of {} characters",
                MAX_PROMPT_LENGTH
            )));
        }

        if let Some(model) = &raw.model
            && model.trim().is_empty()
        {
            return Err(serde::de::Error::custom("model cannot be empty"));
        }

        if let Some(t) = raw.temperature
            && (!t.is_finite() || !(0.0..=2.0).contains(&t))
        {
            return Err(serde::de::Error::custom(format!(
                "temperature must be between 0.0 and 2.0 (got {})",
                t
            )));
        }

        if raw.max_tokens == Some(0) {
            return Err(serde::de::Error::custom("max_tokens must be greater than 0"));
        }

        if let Some(min) = raw.min_length
            && min > MAX_MIN_LENGTH
        {
            return Err(serde::de::Error::custom(format!(
                "min_length must be at most {} (got {})",
                MAX_MIN_LENGTH, min
            )));
        }

        Ok(GenerateRequest {
            prompt: raw.prompt,
            system_prompt: raw.system_prompt,
            plan: raw.plan,
            complexity: raw.complexity,
            task_type: raw.task_type,
            preferred_tier: raw.preferred_tier,
            model: raw.model,
            priority: raw.priority,
            temperature: raw.temperature,
            max_tokens: raw.max_tokens,
            min_length: raw.min_length,
            use_cache: raw.use_cache,
        })
    }
}

/// Response body of POST /v1/generate
#[derive(Debug, Clone, Serialize)]
pub struct GenerateResponse {
    pub request_id: String,
    #[serde(flatten)]
    pub result: GenerationResponse,
}

/// POST /v1/generate handler
///
/// The whole request, queue wait included, is bounded by
/// `server.request_timeout_seconds`. A timed-out request keeps its queue
/// position and still runs; only the response is abandoned.
pub async fn handler(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, AppError> {
    tracing::debug!(
        request_id = %request_id,
        prompt_length = request.prompt().chars().count(),
        plan = request.plan().as_str(),
        "Received generate request"
    );

    let timeout_seconds = state.config().server.request_timeout_seconds;
    let result = tokio::time::timeout(
        Duration::from_secs(timeout_seconds),
        state
            .dispatcher()
            .generate(request.into_generation_request()),
    )
    .await
    .map_err(|_| {
        tracing::warn!(
            request_id = %request_id,
            timeout_seconds = timeout_seconds,
            "Generate request timed out"
        );
        AppError::Timeout(timeout_seconds)
    })?
    .inspect_err(|e| {
        tracing::warn!(request_id = %request_id, error = %e, "Generate request failed");
    })?;

    Ok(Json(GenerateResponse {
        request_id: request_id.to_string(),
        result,
    }))
}
