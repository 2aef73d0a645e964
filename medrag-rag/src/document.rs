//! Data types for documents, chunks, and retrieval results.

use serde::{Deserialize, Serialize};

/// A normalized document produced by a loader: plain text plus provenance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawDocument {
    /// The full text of the document.
    pub text: String,
    /// Identifier of the originating document (path or URL).
    pub source: String,
}

impl RawDocument {
    /// Create a document from its text and source identifier.
    pub fn new(text: impl Into<String>, source: impl Into<String>) -> Self {
        Self { text: text.into(), source: source.into() }
    }
}

/// A bounded span of a [`RawDocument`] with its vector embedding.
///
/// Chunks are immutable once they enter a [`VectorIndex`](crate::VectorIndex);
/// searches hand out clones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Unique identifier for the chunk.
    pub id: String,
    /// The text content of the chunk.
    pub text: String,
    /// Identifier of the originating document.
    pub source: String,
    /// Character position of the chunk start within the source text.
    pub offset: usize,
    /// The vector embedding for this chunk's text. Empty until embedded.
    pub embedding: Vec<f32>,
}

/// A retrieved [`Chunk`] paired with a relevance score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalResult {
    /// The retrieved chunk.
    pub chunk: Chunk,
    /// The similarity score (higher is more relevant).
    pub score: f32,
}
