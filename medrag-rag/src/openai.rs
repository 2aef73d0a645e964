//! Embeddings from an OpenAI-compatible `/embeddings` endpoint.
//!
//! Only compiled with the `openai` feature. Any server speaking the same
//! protocol (OpenAI, Together, a local vLLM or Ollama gateway) can be used by
//! changing the base URL.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "text-embedding-3-small";
const DEFAULT_DIMENSIONS: usize = 1536;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const PROVIDER: &str = "openai-compatible";

fn failure(message: impl Into<String>) -> RagError {
    RagError::EmbeddingError { provider: PROVIDER.to_string(), message: message.into() }
}

/// An [`EmbeddingProvider`] that calls a remote embeddings API.
///
/// Every response is checked before it reaches the index: one vector per
/// input, each of [`dimensions`](EmbeddingProvider::dimensions) length.
/// A server that silently changes the vector size is reported as an
/// [`RagError::EmbeddingError`] instead of corrupting the index later.
///
/// ```rust,ignore
/// use medrag_rag::openai::OpenAIEmbeddingProvider;
///
/// let provider = OpenAIEmbeddingProvider::new(api_key)?
///     .with_base_url("http://localhost:11434/v1")
///     .with_model("nomic-embed-text")
///     .with_dimensions(768);
/// ```
pub struct OpenAIEmbeddingProvider {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
    dimensions: usize,
    truncate_to: Option<usize>,
}

impl fmt::Debug for OpenAIEmbeddingProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAIEmbeddingProvider")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

impl OpenAIEmbeddingProvider {
    /// Create a provider for `text-embedding-3-small` on the OpenAI API.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmbeddingError`] for a blank key or if the HTTP
    /// client cannot be built.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(failure("API key must not be empty"));
        }
        Ok(Self {
            http: http_client(DEFAULT_TIMEOUT)?,
            api_key,
            endpoint: embeddings_endpoint(DEFAULT_BASE_URL),
            model: DEFAULT_MODEL.to_string(),
            dimensions: DEFAULT_DIMENSIONS,
            truncate_to: None,
        })
    }

    /// Use another server; `base_url` is the API root, e.g. `https://host/v1`.
    pub fn with_base_url(mut self, base_url: impl AsRef<str>) -> Self {
        self.endpoint = embeddings_endpoint(base_url.as_ref());
        self
    }

    /// Use another embedding model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Ask the server for `dims`-long vectors and expect them back.
    pub fn with_dimensions(mut self, dims: usize) -> Self {
        self.dimensions = dims;
        self.truncate_to = Some(dims);
        self
    }

    /// Per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.http = http_client(timeout)?;
        Ok(self)
    }
}

fn embeddings_endpoint(base_url: &str) -> String {
    format!("{}/embeddings", base_url.trim_end_matches('/'))
}

fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| failure(format!("cannot build HTTP client: {e}")))
}

#[derive(Serialize)]
struct EmbeddingsBody<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingsReply {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ApiFailure {
    error: ApiFailureDetail,
}

#[derive(Deserialize)]
struct ApiFailureDetail {
    message: String,
}

/// Order vectors by input position and check count and length.
fn decode_reply(reply: EmbeddingsReply, inputs: usize, dimensions: usize) -> Result<Vec<Vec<f32>>> {
    let mut slots: Vec<Option<Vec<f32>>> = vec![None; inputs];
    for item in reply.data {
        let slot = slots
            .get_mut(item.index)
            .ok_or_else(|| failure(format!("response index {} out of range", item.index)))?;
        if item.embedding.len() != dimensions {
            return Err(failure(format!(
                "expected {dimensions}-dimensional vectors, got {}",
                item.embedding.len()
            )));
        }
        *slot = Some(item.embedding);
    }
    slots
        .into_iter()
        .enumerate()
        .map(|(i, slot)| slot.ok_or_else(|| failure(format!("no vector returned for input {i}"))))
        .collect()
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])
            .await?
            .pop()
            .ok_or_else(|| failure("no vector returned"))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(model = %self.model, inputs = texts.len(), "requesting embeddings");

        let body = EmbeddingsBody { model: &self.model, input: texts, dimensions: self.truncate_to };
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(endpoint = %self.endpoint, error = %e, "embedding request failed");
                failure(format!("request failed: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<ApiFailure>(&raw) {
                Ok(parsed) => parsed.error.message,
                Err(_) => raw,
            };
            error!(endpoint = %self.endpoint, %status, "embedding API rejected the request");
            return Err(failure(format!("{status}: {message}")));
        }

        let reply: EmbeddingsReply =
            response.json().await.map_err(|e| failure(format!("malformed response: {e}")))?;
        decode_reply(reply, texts.len(), self.dimensions)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(json: &str) -> EmbeddingsReply {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn reply_is_reordered_by_input_index() {
        let decoded = decode_reply(
            reply(r#"{"data":[{"index":1,"embedding":[0.0,1.0]},{"index":0,"embedding":[1.0,0.0]}]}"#),
            2,
            2,
        )
        .unwrap();
        assert_eq!(decoded, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn missing_or_misshapen_vectors_are_errors() {
        let short = decode_reply(reply(r#"{"data":[{"index":0,"embedding":[1.0]}]}"#), 1, 2);
        assert!(matches!(short, Err(RagError::EmbeddingError { .. })));

        let missing = decode_reply(reply(r#"{"data":[{"index":0,"embedding":[1.0,0.0]}]}"#), 2, 2);
        assert!(missing.is_err());

        let stray = decode_reply(reply(r#"{"data":[{"index":5,"embedding":[1.0,0.0]}]}"#), 1, 2);
        assert!(stray.is_err());
    }

    #[test]
    fn request_body_omits_unset_dimensions() {
        let inputs = ["rash"];
        let body = EmbeddingsBody { model: "m", input: &inputs, dimensions: None };
        assert_eq!(serde_json::to_string(&body).unwrap(), r#"{"model":"m","input":["rash"]}"#);
    }

    #[test]
    fn blank_key_is_rejected_and_debug_hides_it() {
        assert!(OpenAIEmbeddingProvider::new("  ").is_err());
        let provider = OpenAIEmbeddingProvider::new("sk-secret").unwrap().with_base_url("http://local/v1/");
        let shown = format!("{provider:?}");
        assert!(shown.contains("http://local/v1/embeddings"));
        assert!(!shown.contains("sk-secret"));
    }
}
