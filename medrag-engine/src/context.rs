//! Context assembly under a size budget.
//!
//! The payload has four sections, in this order:
//!
//! 1. reference chunks, most relevant first, each headed by a source marker
//!    such as `[S1] (source: flu.pdf)`; chunks of the same source share one
//!    marker
//! 2. patient notes taken from the user's preferences
//! 3. prior turns, oldest first, with assistant replies clipped
//! 4. the current question
//!
//! When the rendered payload exceeds the budget, the lowest-relevance chunk
//! is dropped first, then the oldest turn, then the patient notes. The
//! question is always kept whole, even if it alone exceeds the budget.

use std::fmt::Write as _;

use medrag_memory::{ConversationTurn, Preferences};
use medrag_rag::RetrievalResult;
use tracing::debug;

/// A citation marker and the source it stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMarker {
    /// Marker label without brackets, e.g. `S1`.
    pub label: String,
    /// Source identifier of the chunks under this marker.
    pub source: String,
}

/// The rendered context plus what went into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledContext {
    /// The payload handed to the completion service.
    pub text: String,
    /// Markers of included sources, in relevance order.
    pub markers: Vec<SourceMarker>,
    /// Number of chunks that fit the budget.
    pub chunks_included: usize,
    /// Number of chunks dropped for the budget.
    pub chunks_dropped: usize,
    /// Number of prior turns that fit the budget.
    pub turns_included: usize,
    /// Number of prior turns dropped for the budget.
    pub turns_dropped: usize,
    /// Whether patient notes are part of the payload.
    pub notes_included: bool,
}

/// Builds bounded, deterministic context payloads.
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    budget_chars: usize,
    reply_chars: usize,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self { budget_chars: 12_000, reply_chars: 200 }
    }
}

impl ContextAssembler {
    /// Create an assembler with a budget in characters and a clip length
    /// for prior assistant replies.
    pub fn new(budget_chars: usize, reply_chars: usize) -> Self {
        Self { budget_chars, reply_chars }
    }

    /// Assemble the payload for `query`.
    ///
    /// `results` must already be in descending relevance order and `history`
    /// in chronological order.
    pub fn assemble(
        &self,
        query: &str,
        history: &[ConversationTurn],
        results: &[RetrievalResult],
        preferences: Option<&Preferences>,
    ) -> AssembledContext {
        let notes = preferences.map(patient_notes).unwrap_or_default();

        let mut chunk_count = results.len();
        let mut first_turn = 0;
        let mut with_notes = !notes.is_empty();

        loop {
            let (text, markers) = self.render(
                query,
                &history[first_turn..],
                &results[..chunk_count],
                with_notes.then_some(notes.as_str()),
            );
            let over_budget = text.chars().count() > self.budget_chars;

            if over_budget && chunk_count > 0 {
                chunk_count -= 1;
            } else if over_budget && first_turn < history.len() {
                first_turn += 1;
            } else if over_budget && with_notes {
                with_notes = false;
            } else {
                let context = AssembledContext {
                    text,
                    markers,
                    chunks_included: chunk_count,
                    chunks_dropped: results.len() - chunk_count,
                    turns_included: history.len() - first_turn,
                    turns_dropped: first_turn,
                    notes_included: with_notes,
                };
                debug!(
                    chars = context.text.chars().count(),
                    chunks = context.chunks_included,
                    chunks_dropped = context.chunks_dropped,
                    turns = context.turns_included,
                    turns_dropped = context.turns_dropped,
                    notes = context.notes_included,
                    "assembled context"
                );
                return context;
            }
        }
    }

    fn render(
        &self,
        query: &str,
        history: &[ConversationTurn],
        results: &[RetrievalResult],
        notes: Option<&str>,
    ) -> (String, Vec<SourceMarker>) {
        let mut markers: Vec<SourceMarker> = Vec::new();
        let mut text = String::from("Reference material:\n");

        if results.is_empty() {
            text.push_str("No reference material matched this question.\n");
        }
        for result in results {
            let source = &result.chunk.source;
            let label = match markers.iter().find(|m| &m.source == source) {
                Some(marker) => marker.label.clone(),
                None => {
                    let label = format!("S{}", markers.len() + 1);
                    markers.push(SourceMarker { label: label.clone(), source: source.clone() });
                    label
                }
            };
            let _ = writeln!(text, "[{label}] (source: {source})\n{}\n", result.chunk.text.trim());
        }

        if let Some(notes) = notes {
            let _ = writeln!(text, "\nPatient notes:\n{notes}");
        }

        if !history.is_empty() {
            text.push_str("\nConversation so far:\n");
            for turn in history {
                let _ = writeln!(text, "User: {}", turn.user_message.trim());
                let _ = writeln!(text, "Assistant: {}", clip(turn.bot_response.trim(), self.reply_chars));
            }
        }

        let _ = write!(text, "\nCurrent question:\n{query}");
        (text, markers)
    }
}

/// Keep the first `limit` characters, marking the cut with `...`.
fn clip(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn patient_notes(preferences: &Preferences) -> String {
    let mut notes = String::new();
    if let Some(name) = &preferences.display_name {
        let _ = writeln!(notes, "- Name: {name}");
    }
    if !preferences.known_conditions.is_empty() {
        let conditions: Vec<&str> = preferences.known_conditions.iter().map(String::as_str).collect();
        let _ = writeln!(notes, "- Known conditions: {}", conditions.join(", "));
    }
    if !preferences.allergies.is_empty() {
        let allergies: Vec<&str> = preferences.allergies.iter().map(String::as_str).collect();
        let _ = writeln!(notes, "- Allergies: {}", allergies.join(", "));
    }
    for (key, value) in &preferences.extra {
        match value {
            serde_json::Value::String(s) => {
                let _ = writeln!(notes, "- {key}: {s}");
            }
            other => {
                let _ = writeln!(notes, "- {key}: {other}");
            }
        }
    }
    notes.trim_end().to_string()
}
