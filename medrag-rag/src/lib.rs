//! # medrag-rag
//!
//! The knowledge-base half of MedRAG: turning documents into embedded chunks
//! and finding the chunks most relevant to a query.
//!
//! ## Overview
//!
//! - [`FixedSizeChunker`]: overlapping character windows with provenance
//! - [`EmbeddingProvider`]: text → fixed-length vector
//!   ([`HashingEmbedder`] offline, `openai::OpenAIEmbeddingProvider` behind
//!   the `openai` feature)
//! - [`VectorIndex`]: exact nearest-neighbour search with atomic generation
//!   swaps and save/load through a [`medrag_core::Storage`]
//! - [`DocumentLoader`] / [`TextDirectoryLoader`]: raw documents from disk
//! - [`Ingestor`]: chunk → embed → index, skipping bad documents
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use medrag_rag::{
//!     DocumentLoader, FixedSizeChunker, HashingEmbedder, Ingestor, RagConfig,
//!     TextDirectoryLoader, VectorIndex,
//! };
//!
//! let config = RagConfig::default();
//! let embedder = Arc::new(HashingEmbedder::default());
//! let ingestor = Ingestor::new(Arc::new(FixedSizeChunker::from_config(&config)?), embedder.clone());
//!
//! let documents = TextDirectoryLoader::new().load("data/docs").await?;
//! let index = VectorIndex::new(config.metric);
//! ingestor.build_index(&index, &documents).await?;
//!
//! let query = embedder.embed("persistent cough").await?;
//! for hit in index.search(&query, 5).await? {
//!     println!("{:.3} {}", hit.score, hit.chunk.source);
//! }
//! ```

pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod index;
pub mod ingest;
pub mod loader;

#[cfg(feature = "openai")]
pub mod openai;

pub use chunking::{Chunker, FixedSizeChunker};
pub use config::{RagConfig, RagConfigBuilder};
pub use document::{Chunk, RawDocument, RetrievalResult};
pub use embedding::{EmbeddingProvider, HashingEmbedder};
pub use error::{RagError, Result};
pub use index::{DistanceMetric, IndexStats, VectorIndex};
pub use ingest::{IngestReport, Ingestor, SkippedDocument};
pub use loader::{DocumentLoader, TextDirectoryLoader};
