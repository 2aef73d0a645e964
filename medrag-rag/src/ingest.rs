//! Offline ingestion: chunk → embed → index.
//!
//! The [`Ingestor`] turns [`RawDocument`]s into embedded [`Chunk`]s and feeds
//! them to a [`VectorIndex`]. Failures are per document: an empty document or
//! a failed embedding call is logged, recorded in the [`IngestReport`], and
//! the batch carries on. Only index-level errors (dimension mismatch) abort.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use medrag_rag::{FixedSizeChunker, HashingEmbedder, Ingestor, VectorIndex};
//!
//! let ingestor = Ingestor::new(
//!     Arc::new(FixedSizeChunker::new(1000, 200)?),
//!     Arc::new(HashingEmbedder::default()),
//! );
//! let index = VectorIndex::default();
//! let report = ingestor.build_index(&index, &documents).await?;
//! println!("{} chunks, {} skipped", report.chunks_indexed, report.skipped.len());
//! ```

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::chunking::Chunker;
use crate::document::{Chunk, RawDocument};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::index::VectorIndex;

/// A document that was left out of the index, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedDocument {
    /// Source identifier of the document.
    pub source: String,
    /// Human-readable reason.
    pub reason: String,
}

/// Outcome of preparing a batch of documents.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    /// Embedded chunks, in document order then window order.
    pub chunks: Vec<Chunk>,
    /// Number of documents that produced at least one chunk.
    pub documents_indexed: usize,
    /// Number of chunks handed to the index.
    pub chunks_indexed: usize,
    /// Documents that were skipped.
    pub skipped: Vec<SkippedDocument>,
}

/// Chunks and embeds documents for a [`VectorIndex`].
pub struct Ingestor {
    chunker: Arc<dyn Chunker>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl Ingestor {
    /// Create an ingestor from a chunker and an embedding provider.
    pub fn new(chunker: Arc<dyn Chunker>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { chunker, embedder }
    }

    /// Chunk and embed a single document.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmptyDocument`] for blank text and
    /// [`RagError::EmbeddingError`] if the provider fails or returns the
    /// wrong number of vectors.
    pub async fn ingest_document(&self, document: &RawDocument) -> Result<Vec<Chunk>> {
        let mut chunks = self.chunker.chunk(document)?;

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;
        if embeddings.len() != chunks.len() {
            return Err(RagError::EmbeddingError {
                provider: self.embedder.name().to_string(),
                message: format!(
                    "expected {} embeddings for '{}', got {}",
                    chunks.len(),
                    document.source,
                    embeddings.len()
                ),
            });
        }

        for (chunk, embedding) in chunks.iter_mut().zip(embeddings) {
            chunk.embedding = embedding;
        }
        Ok(chunks)
    }

    /// Chunk and embed every document, skipping the ones that fail.
    pub async fn prepare(&self, documents: &[RawDocument]) -> IngestReport {
        let mut report = IngestReport::default();
        for document in documents {
            match self.ingest_document(document).await {
                Ok(chunks) => {
                    info!(source = %document.source, chunk_count = chunks.len(), "prepared document");
                    report.documents_indexed += 1;
                    report.chunks.extend(chunks);
                }
                Err(e) => {
                    warn!(source = %document.source, error = %e, "skipping document");
                    report
                        .skipped
                        .push(SkippedDocument { source: document.source.clone(), reason: e.to_string() });
                }
            }
        }
        report.chunks_indexed = report.chunks.len();
        report
    }

    /// Rebuild `index` from scratch with `documents`.
    ///
    /// # Errors
    ///
    /// Propagates [`VectorIndex::build`] errors; the index keeps its previous
    /// generation in that case.
    pub async fn build_index(
        &self,
        index: &VectorIndex,
        documents: &[RawDocument],
    ) -> Result<IngestReport> {
        let report = self.prepare(documents).await;
        index.build(report.chunks.clone()).await.inspect_err(|e| {
            error!(error = %e, "index build failed");
        })?;
        info!(
            documents = report.documents_indexed,
            chunks = report.chunks_indexed,
            skipped = report.skipped.len(),
            "knowledge base built"
        );
        Ok(report)
    }

    /// Append `documents` to an existing `index`.
    ///
    /// # Errors
    ///
    /// Propagates [`VectorIndex::add`] errors; nothing is added in that case.
    pub async fn extend_index(
        &self,
        index: &VectorIndex,
        documents: &[RawDocument],
    ) -> Result<IngestReport> {
        let report = self.prepare(documents).await;
        if !report.chunks.is_empty() {
            index.add(report.chunks.clone()).await?;
        }
        info!(
            documents = report.documents_indexed,
            chunks = report.chunks_indexed,
            skipped = report.skipped.len(),
            "knowledge base extended"
        );
        Ok(report)
    }
}
