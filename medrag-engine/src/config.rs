//! Tuning knobs for the answer pipeline.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Configuration for [`RagOrchestrator`](crate::RagOrchestrator).
///
/// Timeouts serialize as `{ "secs": .., "nanos": .. }`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of chunks to retrieve per query.
    pub top_k: usize,
    /// Retrieved chunks scoring below this are ignored.
    pub min_score: Option<f32>,
    /// Number of prior turns offered to the context assembler.
    pub history_turns: usize,
    /// Maximum size of the assembled context, in characters.
    pub context_budget_chars: usize,
    /// Prior assistant replies are clipped to this many characters.
    pub history_reply_chars: usize,
    /// Deadline for a single query-embedding call.
    pub embedding_timeout: Duration,
    /// Deadline for a single completion call.
    pub generation_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_score: None,
            history_turns: 10,
            context_budget_chars: 12_000,
            history_reply_chars: 200,
            embedding_timeout: Duration::from_secs(30),
            generation_timeout: Duration::from_secs(60),
        }
    }
}

impl EngineConfig {
    /// Create a new builder for constructing an [`EngineConfig`].
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Check the invariants the builder enforces.
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(EngineError::ConfigError("top_k must be greater than zero".to_string()));
        }
        if self.context_budget_chars == 0 {
            return Err(EngineError::ConfigError(
                "context_budget_chars must be greater than zero".to_string(),
            ));
        }
        if self.history_reply_chars == 0 {
            return Err(EngineError::ConfigError(
                "history_reply_chars must be greater than zero".to_string(),
            ));
        }
        if self.embedding_timeout.is_zero() || self.generation_timeout.is_zero() {
            return Err(EngineError::ConfigError("timeouts must be non-zero".to_string()));
        }
        if self.min_score.is_some_and(f32::is_nan) {
            return Err(EngineError::ConfigError("min_score must be a number".to_string()));
        }
        Ok(())
    }
}

/// Builder for a validated [`EngineConfig`].
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Set the number of chunks retrieved per query.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Ignore retrieved chunks scoring below `score`.
    pub fn min_score(mut self, score: f32) -> Self {
        self.config.min_score = Some(score);
        self
    }

    /// Set how many prior turns are included in the context.
    pub fn history_turns(mut self, turns: usize) -> Self {
        self.config.history_turns = turns;
        self
    }

    /// Set the context size budget in characters.
    pub fn context_budget_chars(mut self, chars: usize) -> Self {
        self.config.context_budget_chars = chars;
        self
    }

    /// Set the clip length for prior assistant replies.
    pub fn history_reply_chars(mut self, chars: usize) -> Self {
        self.config.history_reply_chars = chars;
        self
    }

    /// Set the query-embedding deadline.
    pub fn embedding_timeout(mut self, timeout: Duration) -> Self {
        self.config.embedding_timeout = timeout;
        self
    }

    /// Set the completion deadline.
    pub fn generation_timeout(mut self, timeout: Duration) -> Self {
        self.config.generation_timeout = timeout;
        self
    }

    /// Build the [`EngineConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ConfigError`] for a zero `top_k`, budget, clip
    /// length or timeout.
    pub fn build(self) -> Result<EngineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
        assert_eq!(EngineConfig::default().history_turns, 10);
    }

    #[test]
    fn rejects_zero_timeout() {
        let err = EngineConfig::builder().generation_timeout(Duration::ZERO).build().unwrap_err();
        assert!(matches!(err, EngineError::ConfigError(_)));
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"top_k": 8}"#).unwrap();
        assert_eq!(config.top_k, 8);
        assert_eq!(config.context_budget_chars, 12_000);
    }
}
