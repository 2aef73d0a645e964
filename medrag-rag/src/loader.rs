//! Document loaders: turn a source location into normalized [`RawDocument`]s.
//!
//! Parsing rich formats (PDF, CSV, web pages) is left to other
//! [`DocumentLoader`] implementations. This module ships a loader for
//! plain-text and markdown files on disk.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::document::RawDocument;
use crate::error::{RagError, Result};

/// A source of raw documents.
///
/// An `Ok(vec![])` means the source exists and holds no documents; a source
/// that cannot be read is an error. Documents with blank text are returned
/// as-is so the ingestion step can report them instead of dropping them
/// silently.
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    /// Load every document found at `source`.
    async fn load(&self, source: &str) -> Result<Vec<RawDocument>>;
}

/// Loads `.txt` and `.md` files from a directory tree.
///
/// Files are visited in sorted path order. Each document's source identifier
/// is its path relative to the directory, with `/` separators. Files that are
/// not valid UTF-8 and subdirectories that cannot be listed are logged and
/// skipped; an unlistable root is an error.
#[derive(Debug, Clone)]
pub struct TextDirectoryLoader {
    extensions: Vec<String>,
}

impl Default for TextDirectoryLoader {
    fn default() -> Self {
        Self { extensions: vec!["txt".into(), "md".into()] }
    }
}

impl TextDirectoryLoader {
    /// Create a loader for `.txt` and `.md` files.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the accepted file extensions (without the leading dot).
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
    }

    fn discover(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(root) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    return Err(RagError::LoaderError {
                        source_id: root.display().to_string(),
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!(path = ?e.path(), error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            if entry.file_type().is_file() && self.accepts(entry.path()) {
                files.push(entry.into_path());
            }
        }
        files.sort();
        Ok(files)
    }
}

fn source_id(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/")
}

#[async_trait]
impl DocumentLoader for TextDirectoryLoader {
    async fn load(&self, source: &str) -> Result<Vec<RawDocument>> {
        let root = Path::new(source);
        if !root.is_dir() {
            return Err(RagError::LoaderError {
                source_id: source.to_string(),
                message: "not a readable directory".to_string(),
            });
        }

        let mut documents = Vec::new();
        for path in self.discover(root)? {
            let id = source_id(root, &path);
            match tokio::fs::read_to_string(&path).await {
                Ok(text) => documents.push(RawDocument { text, source: id }),
                Err(e) => warn!(source = %id, error = %e, "skipping unreadable file"),
            }
        }

        info!(directory = source, document_count = documents.len(), "loaded documents");
        Ok(documents)
    }
}
