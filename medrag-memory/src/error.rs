//! Error types for the `medrag-memory` crate.

use medrag_core::StorageError;
use thiserror::Error;

/// Errors that can occur while reading or updating user memory.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// The user ID cannot be used as a record key.
    #[error("Invalid user id '{0}'")]
    InvalidUserId(String),

    /// The persistence layer failed. The operation had no effect.
    #[error("Memory persistence failed: {0}")]
    Persistence(#[from] StorageError),

    /// A profile could not be encoded for storage.
    #[error("Failed to encode profile for '{user_id}': {source}")]
    Serialization {
        /// The user whose profile was being written.
        user_id: String,
        /// The underlying encoder error.
        #[source]
        source: serde_json::Error,
    },

    /// The stored record for a user could not be decoded.
    ///
    /// The store recovers from this by quarantining the raw bytes and
    /// treating the user as new.
    #[error("Malformed record for user '{user_id}' at '{key}': {message}")]
    MalformedUserRecord {
        /// The user whose record is unreadable.
        user_id: String,
        /// The storage key of the record.
        key: String,
        /// What was wrong with it.
        message: String,
    },
}

/// A convenience result type for memory operations.
pub type Result<T> = std::result::Result<T, MemoryError>;
