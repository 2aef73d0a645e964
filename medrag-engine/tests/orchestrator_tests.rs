use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use medrag_core::{InMemoryStorage, Storage, StorageError};
use medrag_engine::{
    CompletionError, CompletionService, Confidence, EngineConfig, EngineError, FailureReason,
    RagOrchestrator, SafetyPolicy, Stage,
};
use medrag_memory::{MemoryStore, PreferencePatch};
use medrag_rag::{
    EmbeddingProvider, FixedSizeChunker, HashingEmbedder, Ingestor, RagError, RawDocument,
    VectorIndex,
};

const FLU_TEXT: &str =
    "Influenza (flu) symptoms include fever, cough, sore throat, muscle aches and fatigue.";

#[derive(Clone)]
enum Reply {
    Text(String),
    Fail,
    Hang,
}

/// Completion service that plays back a script and records every context.
struct ScriptedCompletion {
    script: Mutex<VecDeque<Reply>>,
    repeat: Reply,
    calls: AtomicU32,
    contexts: Mutex<Vec<String>>,
}

impl ScriptedCompletion {
    fn always(reply: Reply) -> Arc<Self> {
        Self::script(vec![], reply)
    }

    fn text(text: &str) -> Arc<Self> {
        Self::always(Reply::Text(text.to_string()))
    }

    fn script(script: Vec<Reply>, repeat: Reply) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            repeat,
            calls: AtomicU32::new(0),
            contexts: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn context(&self, call: usize) -> String {
        self.contexts.lock().unwrap()[call].clone()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(
        &self,
        _system_instruction: &str,
        context: &str,
        _query: &str,
    ) -> Result<String, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.contexts.lock().unwrap().push(context.to_string());
        let reply = self.script.lock().unwrap().pop_front().unwrap_or_else(|| self.repeat.clone());
        match reply {
            Reply::Text(text) => Ok(text),
            Reply::Fail => Err(CompletionError::Transport("connection reset".into())),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok("too late".into())
            }
        }
    }
}

struct FailingEmbedder {
    calls: AtomicU32,
}

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed(&self, _text: &str) -> medrag_rag::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(RagError::EmbeddingError { provider: "test".into(), message: "offline".into() })
    }

    fn dimensions(&self) -> usize {
        HashingEmbedder::DEFAULT_DIMENSIONS
    }
}

/// Storage that reads nothing and refuses every write.
struct ReadOnlyStorage;

#[async_trait]
impl Storage for ReadOnlyStorage {
    async fn read(&self, _key: &str) -> medrag_core::Result<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn write(&self, _key: &str, _value: &[u8]) -> medrag_core::Result<()> {
        Err(StorageError::Backend { backend: "read-only".into(), message: "disk full".into() })
    }

    async fn list(&self, _prefix: &str) -> medrag_core::Result<Vec<String>> {
        Ok(Vec::new())
    }
}

async fn index_with(documents: &[RawDocument]) -> Arc<VectorIndex> {
    let index = Arc::new(VectorIndex::default());
    let ingestor = Ingestor::new(
        Arc::new(FixedSizeChunker::new(1000, 200).unwrap()),
        Arc::new(HashingEmbedder::default()),
    );
    ingestor.build_index(&index, documents).await.unwrap();
    index
}

async fn flu_index() -> Arc<VectorIndex> {
    index_with(&[RawDocument::new(FLU_TEXT, "flu.pdf")]).await
}

fn memory() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new(Arc::new(InMemoryStorage::new())))
}

fn engine(
    index: Arc<VectorIndex>,
    completion: Arc<ScriptedCompletion>,
    memory: Arc<MemoryStore>,
) -> RagOrchestrator {
    RagOrchestrator::builder()
        .index(index)
        .embedding_provider(Arc::new(HashingEmbedder::default()))
        .memory(memory)
        .completion(completion)
        .build()
        .unwrap()
}

fn disclaimer() -> String {
    SafetyPolicy::default().disclaimer
}

#[tokio::test]
async fn empty_index_headache_gets_ungrounded_fallback() {
    let completion = ScriptedCompletion::text("should not be called");
    let memory = memory();
    let engine = engine(Arc::new(VectorIndex::default()), completion.clone(), memory.clone());

    let report = engine.run("alice", "I have a headache").await.unwrap();
    let answer = &report.answer;

    assert_eq!(answer.confidence, Confidence::Ungrounded);
    assert!(!answer.escalation_flag);
    assert!(answer.sources.is_empty());
    assert!(answer.text.contains("healthcare professional"));
    assert_eq!(answer.text.matches(&disclaimer()).count(), 1);
    assert_eq!(report.failure, Some(FailureReason::NoKnowledgeBase));
    assert_eq!(report.stages, vec![
        Stage::Retrieving,
        Stage::Failed(FailureReason::NoKnowledgeBase)
    ]);
    assert_eq!(completion.calls(), 0);

    let history = memory.history("alice").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].bot_response, answer.text);
}

#[tokio::test]
async fn flu_document_grounds_fever_and_cough() {
    let completion = ScriptedCompletion::text("Fever and cough are common flu symptoms [S1]. Rest and drink fluids.");
    let memory = memory();
    let engine = engine(flu_index().await, completion.clone(), memory.clone());

    let report = engine.run("bob", "I have a fever and cough").await.unwrap();

    assert_eq!(report.answer.sources, vec!["flu.pdf".to_string()]);
    assert_eq!(report.answer.confidence, Confidence::Grounded);
    assert!(!report.answer.escalation_flag);
    assert_eq!(report.failure, None);
    assert_eq!(report.stages, vec![
        Stage::Retrieving,
        Stage::Assembling,
        Stage::Generating,
        Stage::Postprocessing,
        Stage::Done,
    ]);
    assert!(completion.context(0).contains("[S1] (source: flu.pdf)"));

    let history = memory.history("bob").await.unwrap();
    assert_eq!(history[0].cited_sources, vec!["flu.pdf".to_string()]);
}

#[tokio::test]
async fn chest_pain_escalates_even_with_empty_index() {
    let engine = engine(Arc::new(VectorIndex::default()), ScriptedCompletion::text("unused"), memory());
    let answer = engine.ask("carol", "I have Chest Pain and feel dizzy").await.unwrap();

    assert!(answer.escalation_flag);
    assert!(answer.text.starts_with(&SafetyPolicy::default().urgent_notice));
    assert_eq!(answer.confidence, Confidence::Ungrounded);
    assert_eq!(answer.text.matches(&disclaimer()).count(), 1);
}

#[tokio::test]
async fn plural_and_hyphenated_symptoms_escalate() {
    let engine = engine(Arc::new(VectorIndex::default()), ScriptedCompletion::text("unused"), memory());

    for (user, query) in [("frank", "I keep getting chest pains"), ("gina", "Chest-pain since morning")] {
        let answer = engine.ask(user, query).await.unwrap();
        assert!(answer.escalation_flag, "{query}");
        assert!(answer.text.starts_with(&SafetyPolicy::default().urgent_notice));
    }
}

#[tokio::test]
async fn escalation_ignores_reassuring_model_output() {
    let completion = ScriptedCompletion::text("This is nothing to worry about [S1].");
    let engine = engine(flu_index().await, completion, memory());

    let answer = engine.ask("dave", "fever with difficulty breathing").await.unwrap();

    assert!(answer.escalation_flag);
    assert!(answer.text.starts_with(&SafetyPolicy::default().urgent_notice));
    assert!(answer.text.contains("nothing to worry about"));
}

#[tokio::test]
async fn echoed_disclaimer_is_not_duplicated() {
    let echoed = format!("Flu causes fever [S1].\n\n{}\n{}", disclaimer(), disclaimer());
    let engine = engine(flu_index().await, ScriptedCompletion::text(&echoed), memory());

    let answer = engine.ask("erin", "fever?").await.unwrap();
    assert_eq!(answer.text.matches(&disclaimer()).count(), 1);
    assert!(answer.text.ends_with(&disclaimer()));
}

#[tokio::test]
async fn hedged_answer_is_partial() {
    let completion = ScriptedCompletion::text("I'm not sure, but flu can cause a fever [S1].");
    let engine = engine(flu_index().await, completion, memory());

    let answer = engine.ask("fay", "fever?").await.unwrap();
    assert_eq!(answer.confidence, Confidence::Partial);
    assert_eq!(answer.sources, vec!["flu.pdf".to_string()]);
}

#[tokio::test]
async fn uncited_answer_is_ungrounded() {
    let engine = engine(flu_index().await, ScriptedCompletion::text("Drink plenty of water."), memory());

    let report = engine.run("gus", "fever?").await.unwrap();
    assert_eq!(report.answer.confidence, Confidence::Ungrounded);
    assert!(report.answer.sources.is_empty());
    assert_eq!(report.failure, None);
}

#[tokio::test]
async fn generation_is_retried_once_then_succeeds() {
    let completion = ScriptedCompletion::script(
        vec![Reply::Fail],
        Reply::Text("Flu causes fever [S1].".into()),
    );
    let engine = engine(flu_index().await, completion.clone(), memory());

    let report = engine.run("hal", "fever?").await.unwrap();
    assert_eq!(report.generation_attempts, 2);
    assert_eq!(report.answer.confidence, Confidence::Grounded);
    assert_eq!(completion.calls(), 2);
    assert_eq!(completion.context(0), completion.context(1));
}

#[tokio::test]
async fn second_generation_failure_falls_back() {
    let completion = ScriptedCompletion::always(Reply::Fail);
    let memory = memory();
    let engine = engine(flu_index().await, completion.clone(), memory.clone());

    let report = engine.run("ivy", "I have a fever").await.unwrap();

    assert_eq!(completion.calls(), 2);
    assert_eq!(report.failure, Some(FailureReason::GenerationUnavailable));
    assert_eq!(report.answer.confidence, Confidence::Ungrounded);
    assert!(report.answer.sources.is_empty());
    assert!(report.answer.text.contains(&SafetyPolicy::default().unavailable_message));
    assert_eq!(report.answer.text.matches(&disclaimer()).count(), 1);
    assert_eq!(memory.history("ivy").await.unwrap().len(), 1);
}

#[tokio::test]
async fn blank_output_counts_as_failure() {
    let blank = ScriptedCompletion::script(
        vec![Reply::Text("   \n".into()), Reply::Text(disclaimer())],
        Reply::Text("unreachable".into()),
    );
    let engine = engine(flu_index().await, blank.clone(), memory());

    let report = engine.run("jon", "fever?").await.unwrap();
    assert_eq!(report.failure, Some(FailureReason::GenerationUnavailable));
    assert_eq!(blank.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn slow_generation_times_out_and_falls_back() {
    let completion = ScriptedCompletion::always(Reply::Hang);
    let engine = RagOrchestrator::builder()
        .index(flu_index().await)
        .embedding_provider(Arc::new(HashingEmbedder::default()))
        .memory(memory())
        .completion(completion.clone())
        .config(EngineConfig::builder().generation_timeout(Duration::from_secs(5)).build().unwrap())
        .build()
        .unwrap();

    let report = engine.run("kim", "fever?").await.unwrap();
    assert_eq!(report.failure, Some(FailureReason::GenerationUnavailable));
    assert_eq!(completion.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn abandoned_query_leaves_memory_untouched() {
    let memory = memory();
    let engine = engine(flu_index().await, ScriptedCompletion::always(Reply::Hang), memory.clone());

    let abandoned = tokio::time::timeout(Duration::from_secs(1), engine.ask("lea", "fever?")).await;
    assert!(abandoned.is_err());
    assert!(memory.history("lea").await.unwrap().is_empty());
}

#[tokio::test]
async fn embedding_failure_is_retried_then_falls_back() {
    let embedder = Arc::new(FailingEmbedder { calls: AtomicU32::new(0) });
    let completion = ScriptedCompletion::text("unused");
    let engine = RagOrchestrator::builder()
        .index(flu_index().await)
        .embedding_provider(embedder.clone())
        .memory(memory())
        .completion(completion.clone())
        .build()
        .unwrap();

    let report = engine.run("max", "fever?").await.unwrap();
    assert_eq!(report.failure, Some(FailureReason::RetrievalUnavailable));
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
    assert_eq!(completion.calls(), 0);
    assert!(report.answer.text.contains(&SafetyPolicy::default().unavailable_message));
}

#[tokio::test]
async fn prior_turns_and_preferences_reach_the_context() {
    let completion = ScriptedCompletion::text("Flu causes fever [S1].");
    let memory = memory();
    memory
        .update_preferences("nia", PreferencePatch::new().with_known_conditions(["asthma"]))
        .await
        .unwrap();
    let engine = engine(flu_index().await, completion.clone(), memory.clone());

    engine.ask("nia", "What causes a fever?").await.unwrap();
    engine.ask("nia", "And a cough?").await.unwrap();

    let second = completion.context(1);
    assert!(second.contains("User: What causes a fever?"));
    assert!(second.contains("Known conditions: asthma"));
    assert!(second.ends_with("And a cough?"));

    let recent = memory.recent_history("nia", 2).await.unwrap();
    let questions: Vec<&str> = recent.iter().map(|t| t.user_message.as_str()).collect();
    assert_eq!(questions, vec!["What causes a fever?", "And a cough?"]);
}

#[tokio::test]
async fn min_score_can_filter_out_every_chunk() {
    let completion = ScriptedCompletion::text("I don't know.");
    let engine = RagOrchestrator::builder()
        .index(flu_index().await)
        .embedding_provider(Arc::new(HashingEmbedder::default()))
        .memory(memory())
        .completion(completion.clone())
        .config(EngineConfig::builder().min_score(1.5).build().unwrap())
        .build()
        .unwrap();

    let report = engine.run("oli", "fever?").await.unwrap();
    assert_eq!(report.retrieved, 0);
    assert_eq!(report.answer.confidence, Confidence::Ungrounded);
    assert!(completion.context(0).contains("No reference material matched this question."));
}

#[tokio::test]
async fn memory_write_failure_propagates() {
    let memory = Arc::new(MemoryStore::new(Arc::new(ReadOnlyStorage)));
    let engine = engine(Arc::new(VectorIndex::default()), ScriptedCompletion::text("unused"), memory);

    let err = engine.ask("pat", "I have a headache").await.unwrap_err();
    assert!(matches!(err, EngineError::Memory(_)));
}

#[tokio::test]
async fn builder_requires_collaborators() {
    let err = RagOrchestrator::builder().index(Arc::new(VectorIndex::default())).build().err().unwrap();
    assert!(matches!(err, EngineError::ConfigError(_)));
}
