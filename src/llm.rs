//! Generative language model backends.
//!
//! The agent loop and the retrieval-QA tool both talk to the model through
//! the [`LanguageModel`] trait: a prompt goes in, text comes out. Stop
//! sequences are passed through to the backend so a ReAct step ends before
//! the model invents its own `Observation:`.
//!
//! | Config Value | Backend |
//! |-------------|---------|
//! | `"disabled"` | [`DisabledModel`] |
//! | `"openai"` | [`OpenAIModel`] (chat completions, `OPENAI_API_KEY`) |
//! | `"ollama"` | [`OllamaModel`] (`/api/generate`) |

use anyhow::bail;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::LlmConfig;
use crate::http::{send_json_with_retry, HttpFailure};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("language model is disabled")]
    Disabled,

    #[error("{provider} request failed: {message}")]
    Request { provider: String, message: String },

    #[error("{provider} returned an unexpected response: {message}")]
    Response { provider: String, message: String },
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Complete `prompt`, stopping before any of `stop`.
    async fn complete(&self, prompt: &str, stop: &[String]) -> Result<String, LlmError>;
}

pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _prompt: &str, _stop: &[String]) -> Result<String, LlmError> {
        Err(LlmError::Disabled)
    }
}

// ============ OpenAI ============

/// Chat-completions backend. `llm.url` may point at any OpenAI-compatible
/// server; the prompt is sent as a single user message.
pub struct OpenAIModel {
    client: reqwest::Client,
    api_key: String,
    url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
}

impl OpenAIModel {
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAIModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, stop: &[String]) -> Result<String, LlmError> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        if !stop.is_empty() {
            body["stop"] = serde_json::json!(stop);
        }

        let request = self
            .client
            .post(format!("{}/chat/completions", self.url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&body);
        let json = send_with_retry("openai", request, self.max_retries).await?;

        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| LlmError::Response {
                provider: "openai".to_string(),
                message: "missing choices[0].message.content".to_string(),
            })
    }
}

// ============ Ollama ============

pub struct OllamaModel {
    client: reqwest::Client,
    url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
}

impl OllamaModel {
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            model: config.model.clone().unwrap_or_else(|| "mistral".to_string()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl LanguageModel for OllamaModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, stop: &[String]) -> Result<String, LlmError> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": self.temperature,
                "num_predict": self.max_tokens,
                "stop": stop,
            },
        });

        let request = self
            .client
            .post(format!("{}/api/generate", self.url.trim_end_matches('/')))
            .json(&body);
        let json = send_with_retry("ollama", request, self.max_retries).await?;

        json.get("response")
            .and_then(|r| r.as_str())
            .map(str::to_string)
            .ok_or_else(|| LlmError::Response {
                provider: "ollama".to_string(),
                message: "missing response field".to_string(),
            })
    }
}

/// Send a completion request through the shared retry loop.
async fn send_with_retry(
    provider: &str,
    request: reqwest::RequestBuilder,
    max_retries: u32,
) -> Result<serde_json::Value, LlmError> {
    send_json_with_retry(provider, request, max_retries, |failure| match failure {
        HttpFailure::Request(message) => LlmError::Request {
            provider: provider.to_string(),
            message,
        },
        HttpFailure::Response(message) => LlmError::Response {
            provider: provider.to_string(),
            message,
        },
    })
    .await
}

/// Create the [`LanguageModel`] named by `config.provider`.
pub fn create_model(config: &LlmConfig) -> anyhow::Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledModel)),
        "openai" => Ok(Arc::new(OpenAIModel::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaModel::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_model_errors() {
        let err = DisabledModel.complete("hi", &[]).await.unwrap_err();
        assert!(matches!(err, LlmError::Disabled));
    }

    #[test]
    fn factory_defaults() {
        let config = LlmConfig::default();
        let model = create_model(&config).unwrap();
        assert_eq!(model.model_name(), "mistral");

        let config = LlmConfig {
            provider: "disabled".into(),
            ..Default::default()
        };
        assert_eq!(create_model(&config).unwrap().model_name(), "disabled");
    }

    #[test]
    fn factory_rejects_unknown_provider() {
        let config = LlmConfig {
            provider: "gpt-neo".into(),
            ..Default::default()
        };
        assert!(create_model(&config).is_err());
    }
}
