// Ingestion pipeline
// Chunks source text, embeds every chunk and writes the records into a fresh collection

#[cfg(test)]
mod tests;

use futures::{StreamExt, stream};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::database::{CollectionHandle, IndexedRecord, VectorIndex};
use crate::embeddings::{ChunkingConfig, ContentChunk, EmbeddingClient, chunk_document};
use crate::{QaError, Result};

/// Records buffered before each write to the index
const WRITE_BATCH_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestOptions {
    /// Delete an existing collection of the same name before creating it
    pub replace_existing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub collection: String,
    pub chunks: usize,
}

/// Drives chunking, embedding and index writes for one source document at a time
#[derive(Clone)]
pub struct IngestionPipeline {
    embedder: Arc<dyn EmbeddingClient>,
    index: Arc<dyn VectorIndex>,
    chunking: ChunkingConfig,
    show_progress: bool,
}

impl std::fmt::Debug for IngestionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionPipeline")
            .field("chunking", &self.chunking)
            .field("show_progress", &self.show_progress)
            .finish_non_exhaustive()
    }
}

impl IngestionPipeline {
    #[inline]
    pub fn new(
        embedder: Arc<dyn EmbeddingClient>,
        index: Arc<dyn VectorIndex>,
        chunking: ChunkingConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            chunking,
            show_progress: false,
        }
    }

    /// Show a progress bar on attended terminals
    #[inline]
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Populate `collection` from `source_text`, returning the number of chunks stored.
    ///
    /// Fails with `CollectionAlreadyExists` unless `options.replace_existing` is set. An
    /// embedding failure aborts ingestion; records written before it stay in the collection.
    #[inline]
    pub async fn ingest(
        &self,
        source_text: &str,
        collection: &str,
        options: IngestOptions,
    ) -> Result<IngestReport> {
        let chunks = chunk_document(source_text, self.chunking.max_words)?;
        let concurrency = self.chunking.concurrency.max(1);
        let total = chunks.clone().count();

        info!(
            "Ingesting {} chunks into collection {} (max {} words per chunk)",
            total, collection, self.chunking.max_words
        );

        if options.replace_existing {
            match self.index.delete_collection(collection).await {
                Ok(()) => info!("Deleted existing collection {}", collection),
                Err(QaError::CollectionNotFound(_)) => {
                    debug!("No existing collection {} to replace", collection);
                }
                Err(e) => {
                    error!("Failed to delete collection {}: {}", collection, e);
                    return Err(e);
                }
            }
        }

        let handle = self
            .index
            .create_collection(collection, self.embedder.dimension())
            .await
            .inspect_err(|e| error!("Failed to create collection {}: {}", collection, e))?;

        let bar = self.progress_bar(total);
        let embedder = &self.embedder;

        // `buffered` yields in chunk order regardless of which request finishes first
        let mut embedded = stream::iter(chunks)
            .map(|chunk| async move { embed_chunk(embedder.as_ref(), chunk).await })
            .buffered(concurrency);

        let mut pending = Vec::with_capacity(WRITE_BATCH_SIZE);
        let mut stored = 0;

        while let Some(result) = embedded.next().await {
            match result {
                Ok(record) => {
                    pending.push(record);
                    bar.inc(1);
                    if pending.len() >= WRITE_BATCH_SIZE {
                        stored += self.write(&handle, &mut pending).await?;
                    }
                }
                Err(e) => {
                    bar.abandon();
                    error!(
                        "Ingestion into {} aborted after {} chunks: {}",
                        collection,
                        stored + pending.len(),
                        e
                    );
                    // Chunks embedded before the failure are still committed
                    if let Err(write_err) = self.write(&handle, &mut pending).await {
                        warn!("Failed to store chunks embedded before the failure: {}", write_err);
                    }
                    return Err(e);
                }
            }
        }

        stored += self.write(&handle, &mut pending).await?;
        bar.finish_and_clear();

        info!("Stored {} chunks.", stored);
        Ok(IngestReport {
            collection: collection.to_string(),
            chunks: stored,
        })
    }

    async fn write(
        &self,
        handle: &CollectionHandle,
        pending: &mut Vec<IndexedRecord>,
    ) -> Result<usize> {
        if pending.is_empty() {
            return Ok(0);
        }

        let batch = std::mem::take(pending);
        let len = batch.len();
        self.index
            .add(handle, batch)
            .await
            .inspect_err(|e| error!("Failed to store chunks in {}: {}", handle.name(), e))?;
        debug!("Committed {} records to {}", len, handle.name());
        Ok(len)
    }

    fn progress_bar(&self, total: usize) -> ProgressBar {
        if !self.show_progress || !console::user_attended_stderr() {
            return ProgressBar::hidden();
        }

        let style = ProgressStyle::with_template("{spinner} [{pos}/{len}] Embedding chunks {wide_bar}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        ProgressBar::new(total as u64).with_style(style)
    }
}

async fn embed_chunk(embedder: &dyn EmbeddingClient, chunk: ContentChunk) -> Result<IndexedRecord> {
    let embedding = embedder.embed(&chunk.text).await?;

    if embedding.len() != embedder.dimension() {
        return Err(QaError::EmbeddingFailure(format!(
            "embedding for {} has {} dimensions, expected {}",
            chunk.id,
            embedding.len(),
            embedder.dimension()
        )));
    }

    Ok(IndexedRecord {
        id: chunk.id,
        embedding,
        document: chunk.text,
        position: to_u32(chunk.position)?,
        source_offset: to_u32(chunk.source_offset)?,
    })
}

fn to_u32(value: usize) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| QaError::InvalidConfiguration(format!("source document too large: {}", value)))
}
