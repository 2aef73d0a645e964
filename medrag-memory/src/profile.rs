//! The persisted per-user record.
//!
//! Field names are part of the on-disk contract and must not be renamed.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Version written into every new [`UserProfile`].
pub const SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// One exchange between the user and the assistant. Never edited once stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationTurn {
    /// When the turn was recorded (UTC).
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    /// What the user asked.
    pub user_message: String,
    /// The final answer text returned to the user.
    pub bot_response: String,
    /// Sources the answer cited, in relevance order.
    #[serde(default)]
    pub cited_sources: Vec<String>,
}

impl ConversationTurn {
    /// Create a turn stamped with the current time.
    pub fn new(
        user_message: impl Into<String>,
        bot_response: impl Into<String>,
        cited_sources: Vec<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            user_message: user_message.into(),
            bot_response: bot_response.into(),
            cited_sources,
        }
    }
}

/// Strongly typed user preferences.
///
/// Keys this type does not know about are kept in [`extra`](Self::extra) and
/// written back unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Preferences {
    /// How the assistant should address the user.
    #[serde(default, alias = "name", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Conditions the user has told the assistant about.
    #[serde(default)]
    pub known_conditions: BTreeSet<String>,
    /// Known allergies.
    #[serde(default)]
    pub allergies: BTreeSet<String>,
    /// Any other preference keys.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Preferences {
    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.known_conditions.is_empty()
            && self.allergies.is_empty()
            && self.extra.is_empty()
    }

    /// Apply `patch`: every key it sets overwrites the stored value, every key
    /// it leaves out is untouched.
    pub fn merge(&mut self, patch: PreferencePatch) {
        if let Some(name) = patch.display_name {
            self.display_name = Some(name);
        }
        if let Some(conditions) = patch.known_conditions {
            self.known_conditions = conditions;
        }
        if let Some(allergies) = patch.allergies {
            self.allergies = allergies;
        }
        self.extra.extend(patch.extra);
    }
}

/// A partial update for [`Preferences`].
///
/// # Example
///
/// ```rust
/// use medrag_memory::PreferencePatch;
///
/// let patch = PreferencePatch::new()
///     .with_display_name("Alice")
///     .with_allergies(["penicillin"])
///     .with_extra("language", "en");
/// assert!(patch.known_conditions.is_none());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PreferencePatch {
    /// New display name.
    #[serde(default, alias = "name", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Replacement set of known conditions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_conditions: Option<BTreeSet<String>>,
    /// Replacement set of allergies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allergies: Option<BTreeSet<String>>,
    /// Other keys to set.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl PreferencePatch {
    /// An empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the display name.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Replace the known conditions.
    pub fn with_known_conditions<I, S>(mut self, conditions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_conditions = Some(conditions.into_iter().map(Into::into).collect());
        self
    }

    /// Replace the allergies.
    pub fn with_allergies<I, S>(mut self, allergies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allergies = Some(allergies.into_iter().map(Into::into).collect());
        self
    }

    /// Set an arbitrary key.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Whether the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.known_conditions.is_none()
            && self.allergies.is_none()
            && self.extra.is_empty()
    }
}

/// Everything the assistant remembers about one user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    /// Record layout version.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// The user this record belongs to.
    pub user_id: String,
    /// When the profile was first created (UTC).
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    /// Chronological, append-only conversation log.
    #[serde(default)]
    pub conversations: Vec<ConversationTurn>,
    /// Mutable preferences.
    #[serde(default)]
    pub preferences: Preferences,
}

impl UserProfile {
    /// A fresh profile with no turns and empty preferences.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            user_id: user_id.into(),
            created_at: Utc::now(),
            conversations: Vec::new(),
            preferences: Preferences::default(),
        }
    }

    /// The last `n` turns, oldest first.
    pub fn recent(&self, n: usize) -> &[ConversationTurn] {
        let start = self.conversations.len().saturating_sub(n);
        &self.conversations[start..]
    }
}

/// RFC 3339 timestamps. Older records wrote naive ISO-8601 without an
/// offset; those are read as UTC.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(parsed.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|e| D::Error::custom(format!("invalid timestamp '{raw}': {e}")))
    }
}
