//! The durable, per-user memory store.
//!
//! Each user has one JSON record at `users/<encoded id>.json`. Mutations are
//! read-modify-write cycles serialized per user by an async mutex, and every
//! write goes through [`Storage::write`], so the change is durable when the
//! call returns. Different users never wait on each other.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use medrag_core::{FileStorage, Storage};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{MemoryError, Result};
use crate::profile::{ConversationTurn, PreferencePatch, Preferences, UserProfile};

const USERS_PREFIX: &str = "users/";
const RECORD_SUFFIX: &str = ".json";

/// Encode a user ID into a key segment.
///
/// ASCII alphanumerics and `-` are kept; every other byte becomes `_xx`
/// (lowercase hex). Since `_` itself is always escaped the mapping is
/// injective, and the result never contains `.` or `/`.
fn encode_user_id(user_id: &str) -> String {
    let mut encoded = String::with_capacity(user_id.len());
    for byte in user_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            encoded.push(char::from(byte));
        } else {
            encoded.push_str(&format!("_{byte:02x}"));
        }
    }
    encoded
}

/// Inverse of [`encode_user_id`]. Returns `None` for segments it never produces.
fn decode_user_id(segment: &str) -> Option<String> {
    let mut bytes = Vec::with_capacity(segment.len());
    let mut rest = segment.as_bytes();
    while let Some((&byte, tail)) = rest.split_first() {
        if byte == b'_' {
            let hex = std::str::from_utf8(tail.get(..2)?).ok()?;
            bytes.push(u8::from_str_radix(hex, 16).ok()?);
            rest = &tail[2..];
        } else if byte.is_ascii_alphanumeric() || byte == b'-' {
            bytes.push(byte);
            rest = tail;
        } else {
            return None;
        }
    }
    String::from_utf8(bytes).ok()
}

fn record_key(user_id: &str) -> Result<String> {
    if user_id.is_empty() {
        return Err(MemoryError::InvalidUserId(user_id.to_string()));
    }
    Ok(format!("{USERS_PREFIX}{}{RECORD_SUFFIX}", encode_user_id(user_id)))
}

fn decode_profile(user_id: &str, key: &str, bytes: &[u8]) -> Result<UserProfile> {
    let malformed = |message: String| MemoryError::MalformedUserRecord {
        user_id: user_id.to_string(),
        key: key.to_string(),
        message,
    };
    let profile: UserProfile =
        serde_json::from_slice(bytes).map_err(|e| malformed(e.to_string()))?;
    if profile.user_id != user_id {
        return Err(malformed(format!("record belongs to '{}'", profile.user_id)));
    }
    Ok(profile)
}

/// Per-user conversation history and preferences.
///
/// # Example
///
/// ```rust,ignore
/// use medrag_memory::{ConversationTurn, MemoryStore};
///
/// let store = MemoryStore::open("data/user_memory");
/// store.append_turn("alice", ConversationTurn::new("hi", "hello", vec![])).await?;
/// let recent = store.recent_history("alice", 5).await?;
/// ```
pub struct MemoryStore {
    storage: Arc<dyn Storage>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MemoryStore {
    /// Create a store on top of any [`Storage`] backend.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage, locks: Mutex::new(HashMap::new()) }
    }

    /// Create a file-backed store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(FileStorage::new(root)))
    }

    /// Run `work` while holding the user's lock.
    ///
    /// The lock entry is dropped from the map once no other task holds or
    /// waits on it. Handles are only cloned under the map lock, so a strong
    /// count of two (map plus this handle) means nobody else has one.
    async fn with_user_lock<T>(&self, user_id: &str, work: impl Future<Output = T>) -> T {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(user_id.to_string()).or_default())
        };
        let output = {
            let _guard = lock.lock().await;
            work.await
        };

        let mut locks = self.locks.lock().await;
        if Arc::strong_count(&lock) == 2 {
            locks.remove(user_id);
        }
        output
    }

    /// Load a profile. `Ok(None)` means no usable record exists.
    ///
    /// With `quarantine` set, a malformed record is copied aside before the
    /// caller overwrites it; otherwise it is only logged.
    async fn load(&self, user_id: &str, key: &str, quarantine: bool) -> Result<Option<UserProfile>> {
        let Some(bytes) = self.storage.read(key).await? else {
            return Ok(None);
        };
        match decode_profile(user_id, key, &bytes) {
            Ok(profile) => Ok(Some(profile)),
            Err(e) => {
                if quarantine {
                    let backup = format!(
                        "{}.corrupt-{}{RECORD_SUFFIX}",
                        key.trim_end_matches(RECORD_SUFFIX),
                        Utc::now().format("%Y%m%dT%H%M%S%.6fZ")
                    );
                    self.storage.write(&backup, &bytes).await?;
                    warn!(user_id, key, backup = %backup, error = %e, "quarantined malformed user record");
                } else {
                    warn!(user_id, key, error = %e, "ignoring malformed user record");
                }
                Ok(None)
            }
        }
    }

    async fn save(&self, key: &str, profile: &UserProfile) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(profile).map_err(|source| {
            MemoryError::Serialization { user_id: profile.user_id.clone(), source }
        })?;
        self.storage.write(key, &bytes).await?;
        debug!(user_id = %profile.user_id, key, "saved user record");
        Ok(())
    }

    /// Run `mutate` on the user's profile under the user's lock and persist
    /// the result.
    async fn update<T>(
        &self,
        user_id: &str,
        mutate: impl FnOnce(&mut UserProfile) -> T,
    ) -> Result<T> {
        let key = record_key(user_id)?;
        self.with_user_lock(user_id, async {
            let mut profile =
                self.load(user_id, &key, true).await?.unwrap_or_else(|| UserProfile::new(user_id));
            let output = mutate(&mut profile);
            self.save(&key, &profile).await?;
            Ok(output)
        })
        .await
    }

    async fn read_profile(&self, user_id: &str) -> Result<UserProfile> {
        let key = record_key(user_id)?;
        Ok(self.load(user_id, &key, false).await?.unwrap_or_else(|| UserProfile::new(user_id)))
    }

    /// Return the user's profile, creating and persisting an empty one on
    /// first contact.
    ///
    /// A malformed stored record is quarantined and replaced by a fresh
    /// profile.
    pub async fn get_or_create(&self, user_id: &str) -> Result<UserProfile> {
        let key = record_key(user_id)?;
        self.with_user_lock(user_id, async {
            if let Some(profile) = self.load(user_id, &key, true).await? {
                return Ok(profile);
            }
            let profile = UserProfile::new(user_id);
            self.save(&key, &profile).await?;
            info!(user_id, "created user profile");
            Ok(profile)
        })
        .await
    }

    /// Append `turn` to the end of the user's history.
    pub async fn append_turn(&self, user_id: &str, turn: ConversationTurn) -> Result<()> {
        let count = self
            .update(user_id, |profile| {
                profile.conversations.push(turn);
                profile.conversations.len()
            })
            .await?;
        info!(user_id, turn_count = count, "appended conversation turn");
        Ok(())
    }

    /// Merge `patch` into the user's preferences and return the result.
    pub async fn update_preferences(
        &self,
        user_id: &str,
        patch: PreferencePatch,
    ) -> Result<Preferences> {
        let preferences = self
            .update(user_id, |profile| {
                profile.preferences.merge(patch);
                profile.preferences.clone()
            })
            .await?;
        info!(user_id, "updated preferences");
        Ok(preferences)
    }

    /// The last `n` turns, oldest first. Unknown users have no history.
    pub async fn recent_history(&self, user_id: &str, n: usize) -> Result<Vec<ConversationTurn>> {
        let profile = self.read_profile(user_id).await?;
        Ok(profile.recent(n).to_vec())
    }

    /// The complete conversation log, oldest first.
    pub async fn history(&self, user_id: &str) -> Result<Vec<ConversationTurn>> {
        Ok(self.read_profile(user_id).await?.conversations)
    }

    /// The user's preferences.
    pub async fn preferences(&self, user_id: &str) -> Result<Preferences> {
        Ok(self.read_profile(user_id).await?.preferences)
    }

    /// Drop the user's conversation history. Preferences are kept.
    pub async fn clear(&self, user_id: &str) -> Result<()> {
        let removed = self
            .update(user_id, |profile| std::mem::take(&mut profile.conversations).len())
            .await?;
        info!(user_id, removed, "cleared conversation history");
        Ok(())
    }

    /// Every user with a stored record, sorted by record key.
    pub async fn list_users(&self) -> Result<Vec<String>> {
        let keys = self.storage.list(USERS_PREFIX).await?;
        Ok(keys
            .iter()
            .filter_map(|key| key.strip_prefix(USERS_PREFIX)?.strip_suffix(RECORD_SUFFIX))
            .filter(|segment| !segment.contains('/') && !segment.contains('.'))
            .filter_map(decode_user_id)
            .collect())
    }
}
