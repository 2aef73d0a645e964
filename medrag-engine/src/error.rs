//! Error types for the `medrag-engine` crate.

use medrag_memory::MemoryError;
use thiserror::Error;

/// Errors that escape the orchestrator.
///
/// Query-time failures (empty knowledge base, unreachable model, timeouts)
/// never show up here; they become fallback answers. Only configuration
/// problems and memory persistence failures are surfaced.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine or its policy is misconfigured.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A policy phrase could not be compiled into a matcher.
    #[error("Invalid safety policy: {0}")]
    InvalidPolicy(#[from] regex::Error),

    /// The conversation could not be read from or written to memory.
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

/// A convenience result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
