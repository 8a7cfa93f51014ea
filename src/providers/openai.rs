//! OpenAI-compatible chat completions adapter
//!
//! Works against any backend exposing `POST {base_url}/chat/completions`
//! (OpenAI, Groq, OpenRouter, llama.cpp, LM Studio, Ollama).

use super::{ChatMessage, InvokeOptions, Provider, ProviderError};
use crate::config::ProviderConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(flatten)]
    options: &'a InvokeOptions,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// HTTP provider speaking the OpenAI chat completions protocol
#[derive(Debug, Clone)]
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key_env: Option<String>,
    timeout_seconds: u64,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Build an adapter from provider configuration
    ///
    /// The API key is read from the environment on every call so key rotation
    /// does not need a restart.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds()))
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        Ok(Self {
            name: config.name().to_string(),
            base_url: config.base_url().trim_end_matches('/').to_string(),
            api_key_env: config.api_key_env().map(str::to_string),
            timeout_seconds: config.timeout_seconds(),
            client,
        })
    }

    fn api_key(&self) -> Result<Option<String>, ProviderError> {
        match &self.api_key_env {
            None => Ok(None),
            Some(var) => std::env::var(var)
                .map(Some)
                .map_err(|_| ProviderError::MissingApiKey(var.clone())),
        }
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(
        &self,
        messages: &[ChatMessage],
        model: &str,
        options: &InvokeOptions,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = CompletionRequest {
            model,
            messages,
            options,
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = self.api_key()? {
            request = request.bearer_auth(key);
        }

        tracing::debug!(
            provider = %self.name,
            model = model,
            url = %url,
            message_count = messages.len(),
            "Invoking provider"
        );

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(self.timeout_seconds)
            } else {
                ProviderError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Transport(format!("invalid response body: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(ProviderError::EmptyResponse)
    }
}
