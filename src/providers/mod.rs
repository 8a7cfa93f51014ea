//! Model provider adapters
//!
//! The dispatcher treats a provider as an opaque async call that returns text
//! or fails. Every failure is retryable from the dispatcher's point of view;
//! an adapter that wants to classify 4xx vs 5xx has to do it itself or via a
//! validator.

pub mod openai;

pub use openai::OpenAiCompatProvider;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Chat message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of a chat conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Sampling options passed through to the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct InvokeOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Errors raised by provider adapters
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("timed out after {0} seconds")]
    Timeout(u64),

    #[error("response contained no content")]
    EmptyResponse,

    #[error("API key environment variable '{0}' is not set")]
    MissingApiKey(String),

    #[error("{0}")]
    Other(String),
}

/// A text-generation backend
#[async_trait]
pub trait Provider: Send + Sync {
    /// Name used in tier configuration and logs
    fn name(&self) -> &str;

    /// Generate a completion for the conversation with the given model
    async fn invoke(
        &self,
        messages: &[ChatMessage],
        model: &str,
        options: &InvokeOptions,
    ) -> Result<String, ProviderError>;
}

/// Providers by name
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.providers.keys().collect();
        names.sort();
        f.debug_struct("ProviderRegistry")
            .field("providers", &names)
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build HTTP adapters for every `[[providers]]` entry
    pub fn from_config(config: &Config) -> AppResult<Self> {
        let mut registry = Self::new();
        for provider in &config.providers {
            let adapter = OpenAiCompatProvider::from_config(provider).map_err(|e| {
                AppError::Config(format!(
                    "Failed to build provider '{}': {}",
                    provider.name(),
                    e
                ))
            })?;
            registry.register(Arc::new(adapter));
        }
        Ok(registry)
    }

    /// Register a provider under its own name, replacing any previous one
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Provider for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn invoke(
            &self,
            messages: &[ChatMessage],
            model: &str,
            _options: &InvokeOptions,
        ) -> Result<String, ProviderError> {
            Ok(format!("{model}: {}", messages[0].content))
        }
    }

    #[tokio::test]
    async fn test_registry_lookup_by_name() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(Echo));
        assert_eq!(registry.len(), 1);

        let provider = registry.get("echo").expect("registered");
        let out = provider
            .invoke(&[ChatMessage::user("hi")], "m", &InvokeOptions::default())
            .await
            .unwrap();
        assert_eq!(out, "m: hi");
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_registry_from_config_builds_http_adapters() {
        let config: Config = toml::from_str(
            r#"
[[providers]]
name = "local"
base_url = "http://localhost:11434/v1"

[[tiers]]
id = "free"
endpoint = "local"
default_model = "small"
"#,
        )
        .unwrap();
        let registry = ProviderRegistry::from_config(&config).unwrap();
        assert!(registry.get("local").is_some());
    }

    #[test]
    fn test_chat_message_serializes_lowercase_role() {
        let json = serde_json::to_string(&ChatMessage::system("be brief")).unwrap();
        assert_eq!(json, r#"{"role":"system","content":"be brief"}"#);
    }
}
