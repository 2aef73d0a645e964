//! Key-value persistence used by the vector index and the memory store.
//!
//! Keys are `/`-separated relative paths such as `index/knowledge_base.json`
//! or `users/alice.json`. A backend must make each [`write`](Storage::write)
//! durable before returning and must never expose a partially written value
//! to a later [`read`](Storage::read).

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, error};

use crate::error::{Result, StorageError};

/// A durable key-value store.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read the value stored under `key`, or `None` if the key is absent.
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Replace the value stored under `key`.
    ///
    /// The new value is durable once this returns `Ok`. On error the previous
    /// value (if any) is left in place.
    async fn write(&self, key: &str, value: &[u8]) -> Result<()>;

    /// List every key that starts with `prefix`, in lexicographic order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Reject keys that are empty, absolute, or contain `.`/`..` segments.
fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.contains('\\') || key.ends_with('/') {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    let all_normal = Path::new(key).components().all(|c| matches!(c, Component::Normal(_)));
    if !all_normal {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// File-backed storage: each key maps to a file below `root`.
///
/// Writes go to a uniquely named temporary file next to the target, are
/// flushed with `fsync`, then renamed over the target so readers only ever
/// observe the old or the new value.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Create a storage rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory of this storage.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(bytes) => {
                debug!(key, bytes = bytes.len(), "read key");
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => {
                error!(key, error = %e, "read failed");
                Err(StorageError::io(path, e))
            }
        }
    }

    async fn write(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| StorageError::io(parent, e))?;
        }

        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("value");
        let temp_path = path.with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(value).await?;
            file.sync_all().await?;
            fs::rename(&temp_path, &path).await
        }
        .await;

        if let Err(e) = written {
            error!(key, error = %e, "atomic write failed");
            let _ = fs::remove_file(&temp_path).await;
            return Err(StorageError::io(path, e));
        }

        debug!(key, bytes = value.len(), "wrote key");
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::io(dir, e)),
            };
            while let Some(entry) = entries.next_entry().await.map_err(|e| StorageError::io(&dir, e))? {
                let path = entry.path();
                let file_type = entry.file_type().await.map_err(|e| StorageError::io(&path, e))?;
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                // Temporary files from in-flight writes are hidden.
                if entry.file_name().to_string_lossy().starts_with('.') {
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&self.root) else { continue };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

/// Volatile storage backed by an ordered map.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryStorage {
    /// Create an empty in-memory storage.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn write(&self, key: &str, value: &[u8]) -> Result<()> {
        validate_key(key)?;
        self.entries.write().await.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self.entries.read().await;
        Ok(entries.keys().filter(|k| k.starts_with(prefix)).cloned().collect())
    }
}
