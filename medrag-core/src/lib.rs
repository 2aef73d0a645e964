//! # medrag-core
//!
//! Shared building blocks for the MedRAG crates.
//!
//! The only contract the knowledge base and the memory store need from the
//! outside world is a small key-value persistence layer: [`Storage`]. Two
//! backends are provided:
//!
//! - [`FileStorage`]: one file per key under a root directory, written
//!   atomically (temp file, fsync, rename)
//! - [`InMemoryStorage`]: a `BTreeMap` behind a `RwLock`, for tests and
//!   ephemeral deployments
//!
//! ```rust,ignore
//! use medrag_core::{FileStorage, Storage};
//!
//! let storage = FileStorage::new("./data");
//! storage.write("users/alice.json", b"{}").await?;
//! assert!(storage.read("users/alice.json").await?.is_some());
//! ```

pub mod error;
pub mod storage;

pub use error::{Result, StorageError};
pub use storage::{FileStorage, InMemoryStorage, Storage};
