//! # medrag-memory
//!
//! Per-user conversational memory for MedRAG: an append-only log of
//! [`ConversationTurn`]s plus typed [`Preferences`], stored as one JSON
//! record per user through a [`medrag_core::Storage`] backend.
//!
//! ## Guarantees
//!
//! - Every mutation is durable before it returns.
//! - Mutations for the same user are serialized; different users proceed in
//!   parallel.
//! - History is append-only until [`MemoryStore::clear`], which keeps
//!   preferences.
//! - An unreadable record is copied to a `.corrupt-<timestamp>.json` key
//!   before the user is treated as new, so the original bytes survive.

pub mod error;
pub mod profile;
pub mod store;

pub use error::{MemoryError, Result};
pub use profile::{ConversationTurn, PreferencePatch, Preferences, SCHEMA_VERSION, UserProfile};
pub use store::MemoryStore;
