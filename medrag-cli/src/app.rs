//! Wiring of storage, index, memory and services from [`Settings`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use medrag_core::FileStorage;
use medrag_engine::openai::OpenAICompatibleCompletion;
use medrag_engine::{EngineConfig, RagOrchestrator};
use medrag_memory::MemoryStore;
use medrag_rag::openai::OpenAIEmbeddingProvider;
use medrag_rag::{EmbeddingProvider, HashingEmbedder, RagError, VectorIndex};
use tracing::{info, warn};

use crate::cli::Settings;

/// Storage key of the knowledge base inside the vector store directory.
pub const INDEX_KEY: &str = "knowledge_base.json";

const EMBEDDING_TIMEOUT: Duration = Duration::from_secs(30);
const GENERATION_TIMEOUT: Duration = Duration::from_secs(60);

pub fn index_storage(settings: &Settings) -> FileStorage {
    FileStorage::new(&settings.vector_db_path)
}

pub fn memory_store(settings: &Settings) -> Arc<MemoryStore> {
    Arc::new(MemoryStore::open(&settings.memory_path))
}

pub fn embedding_provider(settings: &Settings) -> Result<Arc<dyn EmbeddingProvider>> {
    let Some(api_key) = settings.embedding_api_key.as_deref() else {
        info!("EMBEDDING_API_KEY not set, using offline hashing embeddings");
        return Ok(Arc::new(HashingEmbedder::default()));
    };

    let mut provider = OpenAIEmbeddingProvider::new(api_key)?.with_timeout(EMBEDDING_TIMEOUT)?;
    if let Some(base_url) = &settings.embedding_base_url {
        provider = provider.with_base_url(base_url);
    }
    if let Some(model) = &settings.embedding_model {
        provider = provider.with_model(model);
    }
    Ok(Arc::new(provider))
}

/// Load the saved knowledge base, or start from an empty one.
pub async fn load_index(settings: &Settings) -> Result<VectorIndex> {
    match VectorIndex::load(&index_storage(settings), INDEX_KEY).await {
        Ok(index) => Ok(index),
        Err(RagError::IndexNotFound(_)) => {
            warn!(path = %settings.vector_db_path.display(), "no knowledge base found, run `medrag ingest` first");
            Ok(VectorIndex::default())
        }
        Err(e) => Err(e).context("failed to load the knowledge base"),
    }
}

pub async fn orchestrator(settings: &Settings) -> Result<RagOrchestrator> {
    let api_key = settings
        .groq_api_key
        .as_deref()
        .context("GROQ_API_KEY is not set; export it or pass --groq-api-key")?;
    let completion = OpenAICompatibleCompletion::new(api_key)?
        .with_base_url(&settings.completion_base_url)
        .with_model(&settings.model)
        .with_temperature(settings.temperature)
        .with_timeout(GENERATION_TIMEOUT)?;

    let index = load_index(settings).await?;
    let embedder = embedding_provider(settings)?;
    if let Some(dimension) = index.dimension().await {
        if dimension != embedder.dimensions() {
            warn!(
                index_dimension = dimension,
                embedder_dimension = embedder.dimensions(),
                "embedding provider does not match the one used at ingestion"
            );
        }
    }

    let config = EngineConfig::builder()
        .top_k(settings.top_k)
        .history_turns(settings.history_turns)
        .embedding_timeout(EMBEDDING_TIMEOUT)
        .generation_timeout(GENERATION_TIMEOUT)
        .build()?;

    Ok(RagOrchestrator::builder()
        .config(config)
        .index(Arc::new(index))
        .embedding_provider(embedder)
        .memory(memory_store(settings))
        .completion(Arc::new(completion))
        .build()?)
}
