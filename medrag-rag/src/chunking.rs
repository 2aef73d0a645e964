//! Document chunking.
//!
//! This module provides the [`Chunker`] trait and [`FixedSizeChunker`], which
//! splits text into overlapping character windows.

use crate::config::RagConfig;
use crate::document::{Chunk, RawDocument};
use crate::error::{RagError, Result};

/// A strategy for splitting documents into chunks.
///
/// Implementations produce [`Chunk`]s with text and provenance but no
/// embeddings. Embeddings are attached later by the
/// [`Ingestor`](crate::Ingestor).
pub trait Chunker: Send + Sync {
    /// Split a document into chunks.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmptyDocument`] if the document text is empty or
    /// whitespace-only.
    fn chunk(&self, document: &RawDocument) -> Result<Vec<Chunk>>;
}

/// Splits text into fixed-size windows by character count with overlap.
///
/// Windows advance by `window - overlap` characters and never split a UTF-8
/// sequence. The final window always ends at the end of the text, and a text
/// shorter than one window yields exactly one chunk. Each chunk gets a fresh
/// UUID and records the character offset of its first character.
///
/// # Example
///
/// ```rust,ignore
/// use medrag_rag::{Chunker, FixedSizeChunker, RawDocument};
///
/// let chunker = FixedSizeChunker::new(1000, 200)?;
/// let chunks = chunker.chunk(&RawDocument::new(text, "flu.pdf"))?;
/// ```
#[derive(Debug, Clone)]
pub struct FixedSizeChunker {
    window: usize,
    overlap: usize,
}

impl FixedSizeChunker {
    /// Create a new `FixedSizeChunker`.
    ///
    /// # Arguments
    ///
    /// * `window`: number of characters per chunk
    /// * `overlap`: number of characters shared by consecutive chunks
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] unless `window > overlap`.
    pub fn new(window: usize, overlap: usize) -> Result<Self> {
        if window == 0 || overlap >= window {
            return Err(RagError::ConfigError(format!(
                "chunk window ({window}) must be greater than overlap ({overlap})"
            )));
        }
        Ok(Self { window, overlap })
    }

    /// Create a chunker from the `chunk_size` / `chunk_overlap` of a config.
    pub fn from_config(config: &RagConfig) -> Result<Self> {
        Self::new(config.chunk_size, config.chunk_overlap)
    }
}

impl Chunker for FixedSizeChunker {
    fn chunk(&self, document: &RawDocument) -> Result<Vec<Chunk>> {
        let text = &document.text;
        if text.trim().is_empty() {
            return Err(RagError::EmptyDocument { source_id: document.source.clone() });
        }

        // Byte offset of every char boundary, including the end of the text.
        let bounds: Vec<usize> =
            text.char_indices().map(|(i, _)| i).chain(std::iter::once(text.len())).collect();
        let char_count = bounds.len() - 1;
        let step = self.window - self.overlap;

        let mut chunks = Vec::new();
        let mut start = 0;
        loop {
            let end = (start + self.window).min(char_count);
            chunks.push(Chunk {
                id: uuid::Uuid::new_v4().to_string(),
                text: text[bounds[start]..bounds[end]].to_string(),
                source: document.source.clone(),
                offset: start,
                embedding: Vec::new(),
            });
            if end == char_count {
                break;
            }
            start += step;
        }

        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str) -> RawDocument {
        RawDocument::new(text, "notes.txt")
    }

    /// Rebuild the source by dropping each chunk's leading overlap.
    fn reassemble(chunks: &[Chunk], overlap: usize) -> String {
        let mut out = String::new();
        for (i, chunk) in chunks.iter().enumerate() {
            let skip = if i == 0 { 0 } else { overlap };
            out.extend(chunk.text.chars().skip(skip));
        }
        out
    }

    #[test]
    fn rejects_blank_documents() {
        let chunker = FixedSizeChunker::new(10, 2).unwrap();
        for text in ["", "   ", "\n\t "] {
            let err = chunker.chunk(&doc(text)).unwrap_err();
            assert!(matches!(err, RagError::EmptyDocument { ref source_id } if source_id == "notes.txt"));
        }
    }

    #[test]
    fn short_document_is_a_single_chunk() {
        let chunker = FixedSizeChunker::new(100, 20).unwrap();
        let chunks = chunker.chunk(&doc("Influenza causes fever.")).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Influenza causes fever.");
        assert_eq!(chunks[0].offset, 0);
        assert!(chunks[0].embedding.is_empty());
    }

    #[test]
    fn windows_overlap_and_reassemble_losslessly() {
        let text = "abcdefghijklmnopqrstuvwxyz";
        let chunker = FixedSizeChunker::new(10, 3).unwrap();
        let chunks = chunker.chunk(&doc(text)).unwrap();

        let offsets: Vec<usize> = chunks.iter().map(|c| c.offset).collect();
        assert_eq!(offsets, vec![0, 7, 14, 21]);
        assert_eq!(chunks[1].text, "hijklmnopq");
        assert_eq!(chunks.last().unwrap().text, "vwxyz");
        assert_eq!(reassemble(&chunks, 3), text);
    }

    #[test]
    fn last_window_is_not_swallowed_by_its_predecessor() {
        let chunker = FixedSizeChunker::new(4, 2).unwrap();
        let chunks = chunker.chunk(&doc("0123456789")).unwrap();
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["0123", "2345", "4567", "6789"]);
    }

    #[test]
    fn multibyte_text_is_split_on_char_boundaries() {
        let text = "fièvre • toux • fatigue • maux de tête";
        let chunker = FixedSizeChunker::new(7, 2).unwrap();
        let chunks = chunker.chunk(&doc(text)).unwrap();
        assert!(chunks.iter().all(|c| !c.text.is_empty() && c.text.chars().count() <= 7));
        assert_eq!(reassemble(&chunks, 2), text);
    }

    #[test]
    fn chunk_ids_are_unique() {
        let chunker = FixedSizeChunker::new(5, 0).unwrap();
        let chunks = chunker.chunk(&doc("aaaaabbbbbcccccddddd")).unwrap();
        let mut ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn invalid_window_is_a_config_error() {
        assert!(FixedSizeChunker::new(0, 0).is_err());
        assert!(FixedSizeChunker::new(5, 5).is_err());
        assert!(FixedSizeChunker::new(5, 4).is_ok());
    }
}
