//! The structured answer handed back to callers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse trust signal attached to every [`Answer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// At least one retrieved source was cited and the model did not hedge.
    Grounded,
    /// Sources were cited but the model expressed uncertainty.
    Partial,
    /// No retrieved source backs the answer.
    Ungrounded,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Grounded => "grounded",
            Self::Partial => "partial",
            Self::Ungrounded => "ungrounded",
        })
    }
}

/// The result of one query cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    /// Final text, including the urgent notice when escalated and the
    /// disclaimer exactly once.
    pub text: String,
    /// Cited source identifiers, deduplicated, most relevant first.
    pub sources: Vec<String>,
    /// How well the answer is backed by retrieved material.
    pub confidence: Confidence,
    /// Whether the query described symptoms that need urgent care.
    pub escalation_flag: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_stable_field_names() {
        let answer = Answer {
            text: "Rest and fluids.".into(),
            sources: vec!["flu.pdf".into()],
            confidence: Confidence::Grounded,
            escalation_flag: false,
        };
        let value = serde_json::to_value(&answer).unwrap();
        assert_eq!(value["confidence"], "grounded");
        assert_eq!(value["sources"][0], "flu.pdf");
        assert_eq!(value["escalation_flag"], false);
    }
}
