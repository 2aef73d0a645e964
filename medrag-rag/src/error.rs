//! Error types for the `medrag-rag` crate.

use thiserror::Error;

/// Errors that can occur while building or querying the knowledge base.
#[derive(Debug, Error)]
pub enum RagError {
    /// The document has no text to index. Callers skip it and continue.
    #[error("Document '{source_id}' is empty")]
    EmptyDocument {
        /// The source identifier of the rejected document.
        source_id: String,
    },

    /// A vector does not have the dimension of the index it is meant for.
    #[error("Dimension mismatch for '{id}': expected {expected}, got {actual}")]
    DimensionMismatch {
        /// The chunk ID, or `"query"` for a search vector.
        id: String,
        /// The dimension of the index.
        expected: usize,
        /// The dimension that was supplied.
        actual: usize,
    },

    /// A chunk was handed to the index without an embedding.
    #[error("Chunk '{chunk_id}' has no embedding")]
    EmptyEmbedding {
        /// The offending chunk.
        chunk_id: String,
    },

    /// The index holds no chunks, so nothing can be retrieved.
    #[error("Vector index is empty")]
    EmptyIndex,

    /// No persisted index exists under the given key.
    #[error("No vector index stored under '{0}'")]
    IndexNotFound(String),

    /// A persisted index could not be decoded or encoded.
    #[error("Corrupt vector index '{key}': {message}")]
    CorruptIndex {
        /// The storage key of the index.
        key: String,
        /// A description of the failure.
        message: String,
    },

    /// An argument was outside its valid range (e.g. `k == 0`).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An error occurred during embedding generation.
    #[error("Embedding error ({provider}): {message}")]
    EmbeddingError {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// A document loader could not read its source.
    #[error("Loader error ({source_id}): {message}")]
    LoaderError {
        /// The source the loader was asked for.
        source_id: String,
        /// A description of the failure.
        message: String,
    },

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Reading or writing the persisted index failed.
    #[error(transparent)]
    Persistence(#[from] medrag_core::StorageError),
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;
