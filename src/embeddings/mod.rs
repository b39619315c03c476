// Embeddings module
// Text chunking and the embedding capability used by ingestion and inference

pub mod chunking;
pub mod openai;

use async_trait::async_trait;

use crate::Result;

pub use chunking::{ChunkingConfig, ContentChunk, chunk_document, chunk_words, word_count};
pub use openai::OpenAiEmbeddingClient;

/// Produces a fixed-length vector for a text. Implementations must be safe for concurrent use.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Length of every vector this client returns
    fn dimension(&self) -> usize;

    /// Embed `text`; transport, auth and decoding problems surface as `EmbeddingFailure`
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}
