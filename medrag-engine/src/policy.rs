//! Safety policy: persona, disclaimer, escalation and uncertainty rules.
//!
//! [`SafetyPolicy`] is plain configuration data. [`PolicyMatcher`] compiles it
//! once into case-insensitive regular expressions and applies the text rules
//! to every answer. Escalation keywords match from the start of a word, so
//! plural and hyphenated forms ("chest pains", "chest-pain") escalate too.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

const SYSTEM_INSTRUCTION: &str = "\
You are a friendly medical information assistant. You are not a doctor and you never give a definitive diagnosis.
Answer only from the reference material in the context. Cite every statement you take from it with its marker, for example [S1].
If the reference material does not cover the question, say clearly that you are not sure instead of guessing.
If the user describes serious or worsening symptoms, recommend that they consult a healthcare professional promptly.
Keep answers short and conversational. Do not add a disclaimer; one is appended automatically.";

const DISCLAIMER: &str = "Disclaimer: I am an AI assistant, not a doctor. This information is for educational \
purposes only and is not medical advice. Always consult a qualified healthcare professional for diagnosis and \
treatment, and contact your local emergency services in an emergency.";

const URGENT_NOTICE: &str = "URGENT: Based on the symptoms you describe, you should seek medical attention \
immediately. Contact your local emergency services or go to the nearest emergency room.";

const NO_KNOWLEDGE_MESSAGE: &str = "I don't have any reference documents that cover this question, so I can't \
give you a reliable answer. Please consult a qualified healthcare professional about your symptoms.";

const UNAVAILABLE_MESSAGE: &str = "I'm sorry, I can't reach the services I need to answer reliably right now. \
Please try again later, and consult a qualified healthcare professional if you are worried about your symptoms.";

const ESCALATION_KEYWORDS: &[&str] = &[
    "chest pain",
    "difficulty breathing",
    "severe headache",
    "stroke",
    "heart attack",
    "unconscious",
    "loss of consciousness",
    "high fever",
    "severe bleeding",
    "allergic reaction",
    "anaphylaxis",
    "sudden numbness",
    "slurred speech",
];

const UNCERTAINTY_PHRASES: &[&str] = &[
    "I don't know",
    "I do not know",
    "I'm not sure",
    "I am not sure",
    "not enough information",
    "don't have enough information",
    "unable to determine",
    "cannot determine",
    "can't determine",
    "does not contain",
    "doesn't contain",
    "not covered",
    "no information",
];

/// The configurable rules applied to every answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SafetyPolicy {
    /// Persona and grounding rules sent verbatim to the completion service.
    pub system_instruction: String,
    /// Appended to every answer exactly once.
    pub disclaimer: String,
    /// Prepended to answers whose query matches an escalation keyword.
    pub urgent_notice: String,
    /// Symptom phrases that require urgent care.
    pub escalation_keywords: Vec<String>,
    /// Phrases by which the model admits it does not know.
    pub uncertainty_phrases: Vec<String>,
    /// Fallback text when the knowledge base is empty.
    pub no_knowledge_message: String,
    /// Fallback text when retrieval or generation is unavailable.
    pub unavailable_message: String,
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self {
            system_instruction: SYSTEM_INSTRUCTION.to_string(),
            disclaimer: DISCLAIMER.to_string(),
            urgent_notice: URGENT_NOTICE.to_string(),
            escalation_keywords: ESCALATION_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            uncertainty_phrases: UNCERTAINTY_PHRASES.iter().map(|p| p.to_string()).collect(),
            no_knowledge_message: NO_KNOWLEDGE_MESSAGE.to_string(),
            unavailable_message: UNAVAILABLE_MESSAGE.to_string(),
        }
    }
}

impl SafetyPolicy {
    /// Replace the escalation keyword list.
    pub fn with_escalation_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.escalation_keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the disclaimer.
    pub fn with_disclaimer(mut self, disclaimer: impl Into<String>) -> Self {
        self.disclaimer = disclaimer.into();
        self
    }

    /// Replace the system instruction.
    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = instruction.into();
        self
    }

    /// Compile the policy into a [`PolicyMatcher`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ConfigError`] if the disclaimer is blank or is
    /// contained in one of the other messages, and
    /// [`EngineError::InvalidPolicy`] if a phrase cannot be compiled.
    pub fn compile(self) -> Result<PolicyMatcher> {
        PolicyMatcher::new(self)
    }
}

fn escaped_words(phrase: &str) -> Option<Vec<String>> {
    let words: Vec<String> = phrase
        .split_whitespace()
        .map(|word| regex::escape(word).replace('\'', "['’]"))
        .collect();
    (!words.is_empty()).then_some(words)
}

/// Turn a phrase into a whole-word pattern that tolerates any run of
/// whitespace between words and either apostrophe style.
fn phrase_pattern(phrase: &str) -> Option<String> {
    escaped_words(phrase).map(|words| format!(r"\b{}\b", words.join(r"\s+")))
}

/// Like [`phrase_pattern`], but open at the end and tolerant of hyphens
/// between words: `chest pain` matches `chest pains` and `Chest-pain`.
fn keyword_pattern(keyword: &str) -> Option<String> {
    escaped_words(keyword).map(|words| format!(r"\b{}", words.join(r"[\s-]+")))
}

/// A compiled [`SafetyPolicy`].
#[derive(Debug, Clone)]
pub struct PolicyMatcher {
    policy: SafetyPolicy,
    keywords: Vec<(String, Regex)>,
    uncertainty: Option<Regex>,
}

impl PolicyMatcher {
    /// Compile `policy`. See [`SafetyPolicy::compile`].
    pub fn new(policy: SafetyPolicy) -> Result<Self> {
        let disclaimer = policy.disclaimer.trim();
        if disclaimer.is_empty() {
            return Err(EngineError::ConfigError("disclaimer must not be empty".to_string()));
        }
        for (name, text) in [
            ("urgent_notice", &policy.urgent_notice),
            ("no_knowledge_message", &policy.no_knowledge_message),
            ("unavailable_message", &policy.unavailable_message),
        ] {
            if text.contains(disclaimer) {
                return Err(EngineError::ConfigError(format!("{name} must not contain the disclaimer")));
            }
        }

        let mut keywords = Vec::new();
        for keyword in &policy.escalation_keywords {
            if let Some(pattern) = keyword_pattern(keyword) {
                keywords.push((keyword.trim().to_string(), Regex::new(&format!("(?i){pattern}"))?));
            }
        }

        let alternatives: Vec<String> =
            policy.uncertainty_phrases.iter().filter_map(|p| phrase_pattern(p)).collect();
        let uncertainty = if alternatives.is_empty() {
            None
        } else {
            Some(Regex::new(&format!("(?i)(?:{})", alternatives.join("|")))?)
        };

        Ok(Self { policy, keywords, uncertainty })
    }

    /// The policy this matcher was compiled from.
    pub fn policy(&self) -> &SafetyPolicy {
        &self.policy
    }

    /// Escalation keywords found in `query`, in policy order.
    pub fn escalation_matches(&self, query: &str) -> Vec<&str> {
        self.keywords
            .iter()
            .filter(|(_, pattern)| pattern.is_match(query))
            .map(|(keyword, _)| keyword.as_str())
            .collect()
    }

    /// Whether `query` describes symptoms that need urgent care.
    pub fn requires_escalation(&self, query: &str) -> bool {
        self.keywords.iter().any(|(_, pattern)| pattern.is_match(query))
    }

    /// Whether `text` contains an explicit admission of not knowing.
    pub fn expresses_uncertainty(&self, text: &str) -> bool {
        self.uncertainty.as_ref().is_some_and(|pattern| pattern.is_match(text))
    }

    /// Remove every copy of the disclaimer the model may have echoed.
    pub fn strip_disclaimer(&self, text: &str) -> String {
        let disclaimer = self.policy.disclaimer.trim();
        let mut text = text.to_string();
        while text.contains(disclaimer) {
            text = text.replace(disclaimer, "");
        }
        text.trim().to_string()
    }

    /// Build the final answer text: urgent notice first when `escalate` is
    /// set, then the body without echoed disclaimers, then the disclaimer.
    pub fn finalize(&self, body: &str, escalate: bool) -> String {
        let body = self.strip_disclaimer(body);
        let mut text = String::new();
        if escalate {
            text.push_str(self.policy.urgent_notice.trim());
            text.push_str("\n\n");
        }
        if !body.is_empty() {
            text.push_str(&body);
            text.push_str("\n\n");
        }
        text.push_str(self.policy.disclaimer.trim());
        text
    }
}
