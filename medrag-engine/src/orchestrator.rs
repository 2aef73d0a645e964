//! The end-to-end answer pipeline.
//!
//! Each query walks `Retrieving → Assembling → Generating → Postprocessing
//! → Done`, or stops in `Failed(reason)`. A failed query still produces a
//! disclaimer-bearing fallback [`Answer`] and is recorded in memory like any
//! other turn. The turn is written last, so abandoning the future before
//! that point leaves memory untouched.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use medrag_engine::{EngineConfig, RagOrchestrator};
//!
//! let engine = RagOrchestrator::builder()
//!     .index(index)
//!     .embedding_provider(Arc::new(embedder))
//!     .memory(memory)
//!     .completion(Arc::new(completion))
//!     .config(EngineConfig::default())
//!     .build()?;
//!
//! let answer = engine.ask("alice", "I have a fever and cough").await?;
//! println!("{} ({})", answer.text, answer.confidence);
//! ```

use std::fmt;
use std::sync::Arc;

use medrag_memory::{ConversationTurn, MemoryStore};
use medrag_rag::{EmbeddingProvider, RagError, RetrievalResult, VectorIndex};
use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::answer::{Answer, Confidence};
use crate::completion::CompletionService;
use crate::config::EngineConfig;
use crate::context::ContextAssembler;
use crate::error::{EngineError, Result};
use crate::grounding;
use crate::policy::{PolicyMatcher, SafetyPolicy};

/// Calls to the embedding and completion services are retried once.
const MAX_ATTEMPTS: u32 = 2;

/// Why a query ended in the `Failed` stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The index holds no chunks.
    NoKnowledgeBase,
    /// The query could not be embedded or searched.
    RetrievalUnavailable,
    /// The completion service failed twice.
    GenerationUnavailable,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NoKnowledgeBase => "no_knowledge_base",
            Self::RetrievalUnavailable => "retrieval_unavailable",
            Self::GenerationUnavailable => "generation_unavailable",
        })
    }
}

/// Pipeline stage of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Retrieving,
    Assembling,
    Generating,
    Postprocessing,
    Done,
    Failed(FailureReason),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retrieving => f.write_str("retrieving"),
            Self::Assembling => f.write_str("assembling"),
            Self::Generating => f.write_str("generating"),
            Self::Postprocessing => f.write_str("postprocessing"),
            Self::Done => f.write_str("done"),
            Self::Failed(reason) => write!(f, "failed({reason})"),
        }
    }
}

/// An [`Answer`] together with how it was produced.
#[derive(Debug, Clone, Serialize)]
pub struct QueryReport {
    /// The answer returned to the user.
    pub answer: Answer,
    /// Every stage the query passed through, in order.
    pub stages: Vec<Stage>,
    /// Set when the answer is a fallback.
    pub failure: Option<FailureReason>,
    /// Number of chunks retrieved (after the score filter).
    pub retrieved: usize,
    /// Number of completion calls made.
    pub generation_attempts: u32,
}

struct Trail<'a> {
    user_id: &'a str,
    stages: Vec<Stage>,
}

impl<'a> Trail<'a> {
    fn new(user_id: &'a str) -> Self {
        Self { user_id, stages: Vec::new() }
    }

    fn enter(&mut self, stage: Stage) {
        match stage {
            Stage::Failed(reason) => warn!(user_id = self.user_id, %reason, "query failed"),
            _ => debug!(user_id = self.user_id, %stage, "stage transition"),
        }
        self.stages.push(stage);
    }
}

/// Ties retrieval, memory, context assembly, generation and the safety
/// policy together. Construct one via [`RagOrchestrator::builder()`].
pub struct RagOrchestrator {
    config: EngineConfig,
    index: Arc<VectorIndex>,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    memory: Arc<MemoryStore>,
    completion: Arc<dyn CompletionService>,
    assembler: ContextAssembler,
    matcher: PolicyMatcher,
}

impl RagOrchestrator {
    /// Create a new [`RagOrchestratorBuilder`].
    pub fn builder() -> RagOrchestratorBuilder {
        RagOrchestratorBuilder::default()
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The safety policy in force.
    pub fn policy(&self) -> &SafetyPolicy {
        self.matcher.policy()
    }

    /// The knowledge base this engine searches.
    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    /// The memory store this engine records turns in.
    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    /// Answer `query` for `user_id`.
    ///
    /// # Errors
    ///
    /// Only memory persistence failures are returned; every other failure
    /// becomes a fallback answer.
    pub async fn ask(&self, user_id: &str, query: &str) -> Result<Answer> {
        Ok(self.run(user_id, query).await?.answer)
    }

    /// Like [`ask`](Self::ask), but also report the stages taken.
    pub async fn run(&self, user_id: &str, query: &str) -> Result<QueryReport> {
        let mut trail = Trail::new(user_id);
        let escalate = self.matcher.requires_escalation(query);
        if escalate {
            warn!(user_id, keywords = ?self.matcher.escalation_matches(query), "escalation keywords matched");
        }

        trail.enter(Stage::Retrieving);
        let retrieved = match self.retrieve(query).await {
            Ok(results) => results,
            Err(reason) => return self.fallback(trail, query, reason, escalate, 0, 0).await,
        };

        trail.enter(Stage::Assembling);
        let profile = self.memory.get_or_create(user_id).await?;
        let context = self.assembler.assemble(
            query,
            profile.recent(self.config.history_turns),
            &retrieved,
            Some(&profile.preferences),
        );

        trail.enter(Stage::Generating);
        let (body, attempts) = match self.generate(&context.text, query).await {
            Ok(generated) => generated,
            Err(attempts) => {
                let reason = FailureReason::GenerationUnavailable;
                return self.fallback(trail, query, reason, escalate, retrieved.len(), attempts).await;
            }
        };

        trail.enter(Stage::Postprocessing);
        let sources = grounding::cited_sources(&body, &context.markers);
        let confidence = grounding::assess(&body, &sources, &self.matcher);
        let answer = Answer {
            text: self.matcher.finalize(&body, escalate),
            sources,
            confidence,
            escalation_flag: escalate,
        };

        self.record(user_id, query, &answer).await?;
        trail.enter(Stage::Done);
        info!(
            user_id,
            confidence = %answer.confidence,
            sources = answer.sources.len(),
            escalation = answer.escalation_flag,
            attempts,
            "answered query"
        );

        Ok(QueryReport {
            answer,
            stages: trail.stages,
            failure: None,
            retrieved: retrieved.len(),
            generation_attempts: attempts,
        })
    }

    async fn retrieve(&self, query: &str) -> std::result::Result<Vec<RetrievalResult>, FailureReason> {
        if self.index.is_empty().await {
            return Err(FailureReason::NoKnowledgeBase);
        }

        let embedding = self.embed_query(query).await?;
        let results = match self.index.search(&embedding, self.config.top_k).await {
            Ok(results) => results,
            Err(RagError::EmptyIndex) => return Err(FailureReason::NoKnowledgeBase),
            Err(e) => {
                error!(error = %e, "vector search failed");
                return Err(FailureReason::RetrievalUnavailable);
            }
        };

        let found = results.len();
        let results: Vec<RetrievalResult> = match self.config.min_score {
            Some(min) => results.into_iter().filter(|r| r.score >= min).collect(),
            None => results,
        };
        debug!(found, kept = results.len(), "retrieved chunks");
        Ok(results)
    }

    async fn embed_query(&self, query: &str) -> std::result::Result<Vec<f32>, FailureReason> {
        for attempt in 1..=MAX_ATTEMPTS {
            match timeout(self.config.embedding_timeout, self.embedding_provider.embed(query)).await {
                Ok(Ok(embedding)) => return Ok(embedding),
                Ok(Err(e)) => {
                    warn!(attempt, provider = self.embedding_provider.name(), error = %e, "query embedding failed");
                }
                Err(_) => {
                    warn!(attempt, provider = self.embedding_provider.name(), "query embedding timed out");
                }
            }
        }
        Err(FailureReason::RetrievalUnavailable)
    }

    /// Returns the generated body and the number of attempts, or the number
    /// of attempts made before giving up.
    async fn generate(&self, context: &str, query: &str) -> std::result::Result<(String, u32), u32> {
        let instruction = &self.matcher.policy().system_instruction;
        for attempt in 1..=MAX_ATTEMPTS {
            let call = self.completion.complete(instruction, context, query);
            match timeout(self.config.generation_timeout, call).await {
                Ok(Ok(output)) => {
                    let body = self.matcher.strip_disclaimer(&output);
                    if !body.is_empty() {
                        return Ok((body, attempt));
                    }
                    warn!(attempt, provider = self.completion.name(), "completion was blank");
                }
                Ok(Err(e)) => {
                    warn!(attempt, provider = self.completion.name(), error = %e, "completion failed");
                }
                Err(_) => {
                    warn!(attempt, provider = self.completion.name(), "completion timed out");
                }
            }
        }
        Err(MAX_ATTEMPTS)
    }

    async fn fallback(
        &self,
        mut trail: Trail<'_>,
        query: &str,
        reason: FailureReason,
        escalate: bool,
        retrieved: usize,
        attempts: u32,
    ) -> Result<QueryReport> {
        trail.enter(Stage::Failed(reason));
        let policy = self.matcher.policy();
        let message = match reason {
            FailureReason::NoKnowledgeBase => &policy.no_knowledge_message,
            FailureReason::RetrievalUnavailable | FailureReason::GenerationUnavailable => {
                &policy.unavailable_message
            }
        };
        let answer = Answer {
            text: self.matcher.finalize(message, escalate),
            sources: Vec::new(),
            confidence: Confidence::Ungrounded,
            escalation_flag: escalate,
        };

        self.record(trail.user_id, query, &answer).await?;
        Ok(QueryReport {
            answer,
            stages: trail.stages,
            failure: Some(reason),
            retrieved,
            generation_attempts: attempts,
        })
    }

    async fn record(&self, user_id: &str, query: &str, answer: &Answer) -> Result<()> {
        let turn = ConversationTurn::new(query, answer.text.clone(), answer.sources.clone());
        self.memory.append_turn(user_id, turn).await.inspect_err(|e| {
            error!(user_id, error = %e, "failed to record conversation turn");
        })?;
        Ok(())
    }
}

/// Builder for constructing a [`RagOrchestrator`].
///
/// The index, embedding provider, memory store and completion service are
/// required. Config and policy default to [`EngineConfig::default()`] and
/// [`SafetyPolicy::default()`].
#[derive(Default)]
pub struct RagOrchestratorBuilder {
    config: Option<EngineConfig>,
    policy: Option<SafetyPolicy>,
    index: Option<Arc<VectorIndex>>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    memory: Option<Arc<MemoryStore>>,
    completion: Option<Arc<dyn CompletionService>>,
}

impl RagOrchestratorBuilder {
    /// Set the engine configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the safety policy.
    pub fn policy(mut self, policy: SafetyPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Set the vector index.
    pub fn index(mut self, index: Arc<VectorIndex>) -> Self {
        self.index = Some(index);
        self
    }

    /// Set the embedding provider used for queries.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the memory store.
    pub fn memory(mut self, memory: Arc<MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Set the completion service.
    pub fn completion(mut self, completion: Arc<dyn CompletionService>) -> Self {
        self.completion = Some(completion);
        self
    }

    /// Build the [`RagOrchestrator`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ConfigError`] if a required part is missing or
    /// the config is invalid, and [`EngineError::InvalidPolicy`] if the
    /// policy does not compile.
    pub fn build(self) -> Result<RagOrchestrator> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let matcher = self.policy.unwrap_or_default().compile()?;

        let index =
            self.index.ok_or_else(|| EngineError::ConfigError("index is required".to_string()))?;
        let embedding_provider = self.embedding_provider.ok_or_else(|| {
            EngineError::ConfigError("embedding_provider is required".to_string())
        })?;
        let memory =
            self.memory.ok_or_else(|| EngineError::ConfigError("memory is required".to_string()))?;
        let completion = self
            .completion
            .ok_or_else(|| EngineError::ConfigError("completion is required".to_string()))?;

        Ok(RagOrchestrator {
            assembler: ContextAssembler::new(config.context_budget_chars, config.history_reply_chars),
            config,
            index,
            embedding_provider,
            memory,
            completion,
            matcher,
        })
    }
}
