//! Error types for the `medrag-core` crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by a [`Storage`](crate::Storage) backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The key is empty, absolute, or escapes the storage root.
    #[error("Invalid storage key '{0}'")]
    InvalidKey(String),

    /// An I/O operation on the backing file failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// The file the operation touched.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The backend refused or failed the operation for another reason.
    #[error("Storage backend error ({backend}): {message}")]
    Backend {
        /// The backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

/// A convenience result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
