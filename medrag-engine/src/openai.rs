//! Completion service for OpenAI-compatible `/chat/completions` endpoints.
//!
//! Defaults target Groq's OpenAI-compatible API. This module is only
//! available when the `openai` feature is enabled.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::completion::{CompletionError, CompletionService};

/// Default base URL (Groq).
pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";
/// Default chat model.
pub const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";
const DEFAULT_TEMPERATURE: f32 = 0.3;
const DEFAULT_MAX_TOKENS: u32 = 1024;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const PROVIDER: &str = "openai-compatible";

/// A [`CompletionService`] backed by an OpenAI-compatible chat API.
///
/// # Example
///
/// ```rust,ignore
/// use medrag_engine::openai::OpenAICompatibleCompletion;
///
/// let completion = OpenAICompatibleCompletion::new(std::env::var("GROQ_API_KEY")?)?
///     .with_model("llama-3.1-8b-instant")
///     .with_temperature(0.2);
/// ```
pub struct OpenAICompatibleCompletion {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAICompatibleCompletion {
    /// Create a client with the given API key and default settings.
    ///
    /// # Errors
    ///
    /// Returns [`CompletionError::Transport`] for an empty key or if the HTTP
    /// client cannot be built.
    pub fn new(api_key: impl Into<String>) -> Result<Self, CompletionError> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(CompletionError::Transport("API key must not be empty".into()));
        }
        Ok(Self {
            client: build_client(DEFAULT_TIMEOUT)?,
            api_key,
            base_url: DEFAULT_BASE_URL.into(),
            model: DEFAULT_MODEL.into(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        })
    }

    /// Point the client at another OpenAI-compatible server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the model name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the maximum number of generated tokens.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the HTTP request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, CompletionError> {
        self.client = build_client(timeout)?;
        Ok(self)
    }
}

fn build_client(timeout: Duration) -> Result<reqwest::Client, CompletionError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| CompletionError::Transport(format!("failed to build HTTP client: {e}")))
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

#[async_trait]
impl CompletionService for OpenAICompatibleCompletion {
    async fn complete(
        &self,
        system_instruction: &str,
        context: &str,
        _query: &str,
    ) -> Result<String, CompletionError> {
        debug!(provider = PROVIDER, model = %self.model, context_chars = context.len(), "requesting completion");

        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage { role: "system", content: system_instruction },
                ChatMessage { role: "user", content: context },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(provider = PROVIDER, error = %e, "request failed");
                CompletionError::Transport(e.to_string())
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            let message =
                serde_json::from_str::<ErrorResponse>(&text).map(|e| e.error.message).unwrap_or(text);
            error!(provider = PROVIDER, %status, "API error");
            return Err(CompletionError::Api { status: status.as_u16(), message });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            error!(provider = PROVIDER, error = %e, "failed to parse response");
            CompletionError::Transport(format!("failed to parse response: {e}"))
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(CompletionError::EmptyResponse)
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}
