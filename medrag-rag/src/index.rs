//! The vector index over ingested chunks.
//!
//! [`VectorIndex`] keeps every chunk in insertion order inside an immutable
//! *generation*. The current generation sits behind a `tokio::sync::RwLock`
//! as an `Arc`: searches clone the `Arc` under a short read lock and score
//! against that snapshot, while [`build`](VectorIndex::build),
//! [`add`](VectorIndex::add) and [`remove_source`](VectorIndex::remove_source)
//! assemble a complete new generation and swap it in under the write lock.
//! In-flight searches therefore never observe a half-built structure.
//!
//! Search is exact: every vector is scored and the top `k` are selected, so
//! results do not depend on insertion history and survive a save/load cycle
//! unchanged.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use medrag_core::Storage;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::document::{Chunk, RetrievalResult};
use crate::error::{RagError, Result};

/// Version tag written into persisted indexes.
const FORMAT_VERSION: u32 = 1;

/// How the index measures relevance between two vectors.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Cosine similarity; scores lie in `[-1, 1]`.
    #[default]
    Cosine,
    /// Euclidean distance, reported as a negative score so that higher is
    /// still more relevant.
    L2,
}

impl DistanceMetric {
    /// Score `candidate` against `query`. Higher is more relevant.
    pub fn score(self, query: &[f32], candidate: &[f32]) -> f32 {
        let score = match self {
            Self::Cosine => cosine_similarity(query, candidate),
            Self::L2 => {
                -query.iter().zip(candidate).map(|(a, b)| (a - b) * (a - b)).sum::<f32>().sqrt()
            }
        };
        if score.is_nan() { f32::NEG_INFINITY } else { score }
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// One immutable state of the index.
#[derive(Debug, Default)]
struct Generation {
    dimension: Option<usize>,
    chunks: Vec<Chunk>,
}

impl Generation {
    /// Extend `base` with `chunks`, enforcing a single dimension and unique IDs.
    fn extend(base: Option<&Generation>, chunks: Vec<Chunk>) -> Result<Self> {
        let mut dimension = base.and_then(|g| g.dimension);
        let mut seen: HashSet<&str> =
            base.map(|g| g.chunks.iter().map(|c| c.id.as_str()).collect()).unwrap_or_default();

        for chunk in &chunks {
            let actual = chunk.embedding.len();
            if actual == 0 {
                return Err(RagError::EmptyEmbedding { chunk_id: chunk.id.clone() });
            }
            let expected = *dimension.get_or_insert(actual);
            if actual != expected {
                return Err(RagError::DimensionMismatch { id: chunk.id.clone(), expected, actual });
            }
            if !seen.insert(chunk.id.as_str()) {
                return Err(RagError::InvalidArgument(format!("duplicate chunk id '{}'", chunk.id)));
            }
        }
        drop(seen);

        let mut all = base.map(|g| g.chunks.clone()).unwrap_or_default();
        all.extend(chunks);
        Ok(Self { dimension, chunks: all })
    }
}

/// Summary figures for an index generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    /// Number of stored chunks (equal to the number of vectors).
    pub chunk_count: usize,
    /// Vector dimension, `None` while the index is empty.
    pub dimension: Option<usize>,
    /// Number of distinct source documents.
    pub source_count: usize,
}

#[derive(Serialize)]
struct PersistedIndexRef<'a> {
    format_version: u32,
    metric: DistanceMetric,
    dimension: Option<usize>,
    chunks: &'a [Chunk],
}

#[derive(Deserialize)]
struct PersistedIndex {
    format_version: u32,
    metric: DistanceMetric,
    dimension: Option<usize>,
    chunks: Vec<Chunk>,
}

/// A flat, exact nearest-neighbour index over chunk embeddings.
///
/// # Example
///
/// ```rust,ignore
/// use medrag_rag::{DistanceMetric, VectorIndex};
///
/// let index = VectorIndex::new(DistanceMetric::Cosine);
/// index.build(embedded_chunks).await?;
/// let hits = index.search(&query_embedding, 5).await?;
/// index.save(&storage, "index/knowledge_base.json").await?;
/// ```
#[derive(Debug, Default)]
pub struct VectorIndex {
    metric: DistanceMetric,
    current: RwLock<Arc<Generation>>,
}

impl VectorIndex {
    /// Create an empty index using `metric`.
    pub fn new(metric: DistanceMetric) -> Self {
        Self { metric, current: RwLock::new(Arc::new(Generation::default())) }
    }

    /// The similarity measure used by this index.
    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    async fn snapshot(&self) -> Arc<Generation> {
        Arc::clone(&*self.current.read().await)
    }

    /// Replace the whole index with `chunks`.
    ///
    /// Every chunk must carry an embedding and all embeddings must share one
    /// dimension. On error the previous generation stays in place.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::DimensionMismatch`], [`RagError::EmptyEmbedding`],
    /// or [`RagError::InvalidArgument`] for duplicate chunk IDs.
    pub async fn build(&self, chunks: Vec<Chunk>) -> Result<()> {
        let generation = Generation::extend(None, chunks).inspect_err(|e| {
            error!(error = %e, "index build rejected");
        })?;
        let chunk_count = generation.chunks.len();
        let dimension = generation.dimension;
        *self.current.write().await = Arc::new(generation);
        info!(chunk_count, ?dimension, "built vector index");
        Ok(())
    }

    /// Append `chunks` to the index without re-scoring existing entries.
    ///
    /// The first `add` into an empty index fixes its dimension. Returns the
    /// new chunk count.
    ///
    /// # Errors
    ///
    /// Same as [`build`](Self::build); on error nothing is added.
    pub async fn add(&self, chunks: Vec<Chunk>) -> Result<usize> {
        let added = chunks.len();
        let mut current = self.current.write().await;
        let generation = Generation::extend(Some(&**current), chunks).inspect_err(|e| {
            error!(error = %e, "index add rejected");
        })?;
        let chunk_count = generation.chunks.len();
        *current = Arc::new(generation);
        info!(added, chunk_count, "extended vector index");
        Ok(chunk_count)
    }

    /// Remove every chunk that came from `source`. Returns how many were removed.
    ///
    /// Removing the last chunk resets the index dimension.
    pub async fn remove_source(&self, source: &str) -> usize {
        let mut current = self.current.write().await;
        let chunks: Vec<Chunk> =
            current.chunks.iter().filter(|c| c.source != source).cloned().collect();
        let removed = current.chunks.len() - chunks.len();
        if removed > 0 {
            let dimension = if chunks.is_empty() { None } else { current.dimension };
            *current = Arc::new(Generation { dimension, chunks });
            info!(source, removed, "removed source from vector index");
        }
        removed
    }

    /// Return the `k` chunks most relevant to `query`, best first.
    ///
    /// Ties are broken by insertion order (earlier chunk first). If the
    /// index holds fewer than `k` chunks, all of them are returned.
    ///
    /// # Errors
    ///
    /// - [`RagError::InvalidArgument`] if `k == 0`
    /// - [`RagError::EmptyIndex`] if no chunks are stored
    /// - [`RagError::DimensionMismatch`] if `query` has the wrong length
    pub async fn search(&self, query: &[f32], k: usize) -> Result<Vec<RetrievalResult>> {
        if k == 0 {
            return Err(RagError::InvalidArgument("k must be at least 1".to_string()));
        }
        let generation = self.snapshot().await;
        let Some(dimension) = generation.dimension.filter(|_| !generation.chunks.is_empty()) else {
            return Err(RagError::EmptyIndex);
        };
        if query.len() != dimension {
            return Err(RagError::DimensionMismatch {
                id: "query".to_string(),
                expected: dimension,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = generation
            .chunks
            .iter()
            .enumerate()
            .map(|(position, chunk)| (position, self.metric.score(query, &chunk.embedding)))
            .collect();

        let by_relevance =
            |a: &(usize, f32), b: &(usize, f32)| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0));
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, by_relevance);
            scored.truncate(k);
        }
        scored.sort_by(by_relevance);

        debug!(k, candidates = generation.chunks.len(), returned = scored.len(), "searched index");

        Ok(scored
            .into_iter()
            .map(|(position, score)| RetrievalResult {
                chunk: generation.chunks[position].clone(),
                score,
            })
            .collect())
    }

    /// Number of stored chunks.
    pub async fn len(&self) -> usize {
        self.snapshot().await.chunks.len()
    }

    /// Whether the index holds no chunks.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Vector dimension, `None` while empty.
    pub async fn dimension(&self) -> Option<usize> {
        self.snapshot().await.dimension
    }

    /// Chunk count, dimension, and number of distinct sources.
    pub async fn stats(&self) -> IndexStats {
        let generation = self.snapshot().await;
        let sources: BTreeSet<&str> = generation.chunks.iter().map(|c| c.source.as_str()).collect();
        IndexStats {
            chunk_count: generation.chunks.len(),
            dimension: generation.dimension,
            source_count: sources.len(),
        }
    }

    /// Persist the current generation (vectors, metadata, order) under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Persistence`] if the write fails; the previously
    /// stored value is left untouched in that case.
    pub async fn save(&self, storage: &dyn Storage, key: &str) -> Result<()> {
        let generation = self.snapshot().await;
        let record = PersistedIndexRef {
            format_version: FORMAT_VERSION,
            metric: self.metric,
            dimension: generation.dimension,
            chunks: &generation.chunks,
        };
        let bytes = serde_json::to_vec(&record)
            .map_err(|e| RagError::CorruptIndex { key: key.to_string(), message: e.to_string() })?;
        storage.write(key, &bytes).await.inspect_err(|e| {
            error!(key, error = %e, "failed to save vector index");
        })?;
        info!(key, chunk_count = generation.chunks.len(), "saved vector index");
        Ok(())
    }

    /// Restore an index previously written by [`save`](Self::save).
    ///
    /// # Errors
    ///
    /// - [`RagError::IndexNotFound`] if nothing is stored under `key`
    /// - [`RagError::CorruptIndex`] if the record cannot be decoded or breaks
    ///   the dimension invariant
    /// - [`RagError::Persistence`] if the read fails
    pub async fn load(storage: &dyn Storage, key: &str) -> Result<Self> {
        let bytes =
            storage.read(key).await?.ok_or_else(|| RagError::IndexNotFound(key.to_string()))?;
        let corrupt = |message: String| RagError::CorruptIndex { key: key.to_string(), message };

        let record: PersistedIndex =
            serde_json::from_slice(&bytes).map_err(|e| corrupt(e.to_string()))?;
        if record.format_version != FORMAT_VERSION {
            return Err(corrupt(format!("unsupported format version {}", record.format_version)));
        }
        let generation =
            Generation::extend(None, record.chunks).map_err(|e| corrupt(e.to_string()))?;
        if record.dimension != generation.dimension {
            return Err(corrupt(format!(
                "declared dimension {:?} does not match stored vectors {:?}",
                record.dimension, generation.dimension
            )));
        }

        info!(key, chunk_count = generation.chunks.len(), "loaded vector index");
        Ok(Self { metric: record.metric, current: RwLock::new(Arc::new(generation)) })
    }
}
