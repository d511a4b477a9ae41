//! Completion-endpoint client.
//!
//! Every agent speaks to the model through [`CompletionClient`]: one prompt
//! in, one string out. The HTTP implementation targets an OpenAI-compatible
//! chat-completions endpoint and classifies failures for the runner -
//! retries themselves belong to the per-step policy, not to this client.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::error::AgentError;

/// Uniform model seam for the planner, retrieval, formatting, and quality
/// agents. Each call site parses the returned text into its own schema.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, AgentError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// HTTP client for an OpenAI-compatible completion endpoint.
///
/// Configuration (environment):
/// - `LLM_API_URL`: endpoint URL (defaults to the OpenAI chat completions URL)
/// - `LLM_API_KEY`: bearer token
/// - `LLM_MODEL`: model name
#[derive(Debug, Clone)]
pub struct HttpCompletionClient {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl HttpCompletionClient {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_url: api_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.2,
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let api_url = env::var("LLM_API_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string());
        let api_key = env::var("LLM_API_KEY")
            .map_err(|_| anyhow::anyhow!("LLM_API_KEY is not set"))?;
        let model = env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        Ok(Self::new(api_url, api_key, model))
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn classify_status(status: StatusCode, body: String) -> AgentError {
        match status.as_u16() {
            400 | 401 | 403 | 404 => {
                AgentError::Rejected(format!("{status}: {body}"))
            }
            429 => AgentError::Transient(format!("rate limited: {body}")),
            500 | 502 | 503 | 504 => AgentError::Transient(format!("{status}: {body}")),
            _ => AgentError::Transient(format!("unexpected status {status}: {body}")),
        }
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(&self, prompt: &str) -> Result<String, AgentError> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: self.temperature,
            max_tokens: None,
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AgentError::Transient(format!("request timed out: {e}"))
                } else {
                    AgentError::Transient(format!("network error: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, body));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| AgentError::MalformedOutput(format!("completion response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| AgentError::MalformedOutput("no choices in completion response".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let err = HttpCompletionClient::classify_status(StatusCode::UNAUTHORIZED, String::new());
        assert!(!err.is_retryable());

        let err = HttpCompletionClient::classify_status(StatusCode::TOO_MANY_REQUESTS, String::new());
        assert!(err.is_retryable());

        let err =
            HttpCompletionClient::classify_status(StatusCode::SERVICE_UNAVAILABLE, String::new());
        assert!(err.is_retryable());
    }
}
