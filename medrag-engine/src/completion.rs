//! The completion service seam.

use async_trait::async_trait;
use thiserror::Error;

/// Failures of a completion call. All of them are retried once by the
/// orchestrator and then turned into a fallback answer.
#[derive(Debug, Error)]
pub enum CompletionError {
    /// The request never produced an HTTP response.
    #[error("Completion transport error: {0}")]
    Transport(String),

    /// The service answered with an error.
    #[error("Completion API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message reported by the service.
        message: String,
    },

    /// The service answered without any text.
    #[error("Completion service returned an empty response")]
    EmptyResponse,
}

/// A black-box text generator.
///
/// `context` is the assembled payload and already ends with the current
/// question; `query` is passed separately for services that want it as its
/// own message.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Generate an answer.
    async fn complete(
        &self,
        system_instruction: &str,
        context: &str,
        query: &str,
    ) -> Result<String, CompletionError>;

    /// Name used in logs.
    fn name(&self) -> &str {
        "completion"
    }
}
