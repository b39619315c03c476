
use serde::{Deserialize, Serialize};
use std::str::SplitWhitespace;

use crate::{QaError, Result};

/// Default upper bound on words per chunk
pub const DEFAULT_MAX_WORDS: usize = 500;

/// Represents a chunk of source text ready for embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentChunk {
    /// Index-unique identifier, `chunk_<position>`
    pub id: String,
    /// The chunk text, words joined by single spaces
    pub text: String,
    /// Position of this chunk within the source document
    pub position: usize,
    /// Offset of the chunk's first word within the source document, in words
    pub source_offset: usize,
}

/// Configuration for content chunking
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk size in words
    pub max_words: usize,
    /// Number of embedding requests kept in flight during ingestion
    pub concurrency: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            max_words: DEFAULT_MAX_WORDS,
            concurrency: 1,
        }
    }
}

/// Lazy sequence of whitespace-delimited word groups.
///
/// A clone taken before iteration replays the same sequence independently.
#[derive(Debug, Clone)]
pub struct WordChunks<'a> {
    words: SplitWhitespace<'a>,
    max_words: usize,
}

impl Iterator for WordChunks<'_> {
    type Item = String;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let mut chunk = String::new();

        for (i, word) in self.words.by_ref().take(self.max_words).enumerate() {
            if i > 0 {
                chunk.push(' ');
            }
            chunk.push_str(word);
        }

        if chunk.is_empty() { None } else { Some(chunk) }
    }
}

/// Split `text` on whitespace into consecutive groups of at most `max_words` words.
///
/// There is no overlap between chunks. Empty or whitespace-only input yields no chunks.
#[inline]
pub fn chunk_words(text: &str, max_words: usize) -> Result<WordChunks<'_>> {
    if max_words == 0 {
        return Err(QaError::InvalidConfiguration(
            "chunk size must be greater than 0 words".to_string(),
        ));
    }

    Ok(WordChunks {
        words: text.split_whitespace(),
        max_words,
    })
}

/// Chunk `text` into [`ContentChunk`]s with position-derived ids and word offsets
#[inline]
pub fn chunk_document(
    text: &str,
    max_words: usize,
) -> Result<impl Iterator<Item = ContentChunk> + Clone + '_> {
    let chunks = chunk_words(text, max_words)?;

    Ok(chunks.enumerate().map(move |(position, text)| ContentChunk {
        id: chunk_id(position),
        text,
        position,
        // Every chunk but the last holds exactly `max_words` words
        source_offset: position * max_words,
    }))
}

/// Identifier of the chunk at `position`
#[inline]
pub fn chunk_id(position: usize) -> String {
    format!("chunk_{}", position)
}

/// Number of whitespace-delimited words in `text`
#[inline]
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}
