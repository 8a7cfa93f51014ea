//! Generation request and response types

use crate::providers::{ChatMessage, InvokeOptions};
use crate::retry::Validator;
use crate::router::{Complexity, ModelSource, Plan, TaskType, TierId};
use serde::Serialize;

/// A text-generation request as seen by the dispatcher
///
/// Everything except the prompt and plan is optional: complexity and task type
/// are inferred from the prompt, priority defaults to the plan's.
#[derive(Clone)]
pub struct GenerationRequest {
    prompt: String,
    system_prompt: Option<String>,
    plan: Plan,
    complexity: Option<Complexity>,
    task_type: Option<TaskType>,
    preferred_tier: Option<TierId>,
    model: Option<String>,
    priority: Option<i32>,
    options: InvokeOptions,
    use_cache: bool,
    validator: Option<Validator>,
}

impl std::fmt::Debug for GenerationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationRequest")
            .field("prompt_chars", &self.prompt.chars().count())
            .field("plan", &self.plan)
            .field("complexity", &self.complexity)
            .field("task_type", &self.task_type)
            .field("preferred_tier", &self.preferred_tier)
            .field("model", &self.model)
            .field("priority", &self.priority)
            .field("use_cache", &self.use_cache)
            .finish_non_exhaustive()
    }
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, plan: Plan) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            plan,
            complexity: None,
            task_type: None,
            preferred_tier: None,
            model: None,
            priority: None,
            options: InvokeOptions::default(),
            use_cache: true,
            validator: None,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = Some(complexity);
        self
    }

    pub fn with_task_type(mut self, task_type: TaskType) -> Self {
        self.task_type = Some(task_type);
        self
    }

    pub fn with_preferred_tier(mut self, tier: TierId) -> Self {
        self.preferred_tier = Some(tier);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_options(mut self, options: InvokeOptions) -> Self {
        self.options = options;
        self
    }

    /// Skip the cache lookup and do not store the result
    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn plan(&self) -> Plan {
        self.plan
    }

    pub fn preferred_tier(&self) -> Option<TierId> {
        self.preferred_tier
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn options(&self) -> &InvokeOptions {
        &self.options
    }

    pub fn use_cache(&self) -> bool {
        self.use_cache
    }

    pub fn validator(&self) -> Option<&Validator> {
        self.validator.as_ref()
    }

    /// Supplied complexity, or one estimated from the prompt
    pub fn complexity(&self) -> Complexity {
        self.complexity
            .unwrap_or_else(|| Complexity::estimate(&self.prompt))
    }

    /// Supplied task type, or one classified from the prompt
    pub fn task_type(&self) -> TaskType {
        self.task_type
            .unwrap_or_else(|| TaskType::classify(&self.prompt))
    }

    /// Supplied priority, or the plan default
    pub fn priority(&self) -> i32 {
        self.priority
            .unwrap_or_else(|| self.plan.default_priority())
    }

    /// Conversation sent to the provider
    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(ChatMessage::system(system.clone()));
        }
        messages.push(ChatMessage::user(self.prompt.clone()));
        messages
    }
}

/// Result of a generation request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationResponse {
    pub content: String,
    /// Tier that served the request; `None` for cache hits
    pub tier: Option<TierId>,
    pub model: Option<String>,
    pub model_source: Option<ModelSource>,
    pub cached: bool,
    /// Jaccard similarity of the matched cache entry
    pub similarity: Option<f64>,
    /// Retry attempts made; 0 for cache hits
    pub attempts: u32,
    pub latency_ms: u64,
}
