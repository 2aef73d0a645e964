//! # medrag-engine
//!
//! The answer pipeline of MedRAG. [`RagOrchestrator`] embeds a question,
//! searches the knowledge base, assembles a bounded context with the user's
//! recent history, asks a [`CompletionService`] for an answer, and applies
//! the [`SafetyPolicy`]: source citations, a confidence tier, urgent-care
//! escalation and the medical disclaimer.
//!
//! Query-time failures never reach the caller as errors. An empty knowledge
//! base, an unreachable embedding or completion service, or a timeout each
//! produce an ungrounded fallback [`Answer`] that still carries the
//! disclaimer.
//!
//! ## Features
//!
//! - `openai`: [`openai::OpenAICompatibleCompletion`] for OpenAI-compatible
//!   chat endpoints (Groq by default) and the matching embedding provider in
//!   `medrag-rag`.

pub mod answer;
pub mod completion;
pub mod config;
pub mod context;
pub mod error;
pub mod grounding;
pub mod orchestrator;
pub mod policy;

#[cfg(feature = "openai")]
pub mod openai;

pub use answer::{Answer, Confidence};
pub use completion::{CompletionError, CompletionService};
pub use config::{EngineConfig, EngineConfigBuilder};
pub use context::{AssembledContext, ContextAssembler, SourceMarker};
pub use error::{EngineError, Result};
pub use orchestrator::{FailureReason, QueryReport, RagOrchestrator, RagOrchestratorBuilder, Stage};
pub use policy::{PolicyMatcher, SafetyPolicy};
