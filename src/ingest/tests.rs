use super::*;
use crate::database::MemoryIndex;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Deterministic embedder: vector derived from the text, optional failure on one chunk
struct FakeEmbedder {
    dimension: usize,
    calls: AtomicUsize,
    fail_on: Option<String>,
    wrong_dimension: bool,
}

impl FakeEmbedder {
    fn new(dimension: usize) -> Self {
        Self {
            dimension,
            calls: AtomicUsize::new(0),
            fail_on: None,
            wrong_dimension: false,
        }
    }

    fn failing_on(mut self, text: &str) -> Self {
        self.fail_on = Some(text.to_string());
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingClient for FakeEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        // Later chunks finish first to exercise ordered writes
        let delay = 20_u64.saturating_sub(text.len() as u64);
        tokio::time::sleep(Duration::from_millis(delay)).await;

        if self.fail_on.as_deref() == Some(text) {
            return Err(QaError::EmbeddingFailure("connection refused".to_string()));
        }

        let len = if self.wrong_dimension {
            self.dimension + 1
        } else {
            self.dimension
        };
        let seed = text.bytes().map(f32::from).sum::<f32>();
        Ok((0..len).map(|i| (seed + i as f32).sin()).collect())
    }
}

fn pipeline(
    embedder: Arc<FakeEmbedder>,
    index: Arc<MemoryIndex>,
    max_words: usize,
    concurrency: usize,
) -> IngestionPipeline {
    IngestionPipeline::new(
        embedder,
        index,
        ChunkingConfig {
            max_words,
            concurrency,
        },
    )
}

async fn stored_documents(index: &MemoryIndex, collection: &str) -> Vec<(String, String)> {
    let handle = index.get_collection(collection).await.expect("collection");
    let probe = vec![0.0_f32; handle.dimension()];
    let mut docs: Vec<(String, String)> = index
        .query(&handle, &probe, usize::MAX)
        .await
        .expect("query")
        .into_iter()
        .map(|doc| (doc.id, doc.document))
        .collect();
    docs.sort();
    docs
}

#[tokio::test]
async fn ingests_chunks_with_positional_ids() {
    let embedder = Arc::new(FakeEmbedder::new(4));
    let index = Arc::new(MemoryIndex::new());

    let report = pipeline(embedder.clone(), index.clone(), 2, 1)
        .ingest("one two three four five", "context", IngestOptions::default())
        .await
        .expect("ingest");

    assert_eq!(
        report,
        IngestReport {
            collection: "context".to_string(),
            chunks: 3
        }
    );
    assert_eq!(embedder.calls(), 3);
    assert_eq!(
        stored_documents(&index, "context").await,
        vec![
            ("chunk_0".to_string(), "one two".to_string()),
            ("chunk_1".to_string(), "three four".to_string()),
            ("chunk_2".to_string(), "five".to_string()),
        ]
    );
}

#[tokio::test]
async fn empty_source_makes_no_embedding_calls() {
    let embedder = Arc::new(FakeEmbedder::new(4));
    let index = Arc::new(MemoryIndex::new());

    let report = pipeline(embedder.clone(), index.clone(), 500, 4)
        .ingest("  \n\t ", "context", IngestOptions::default())
        .await
        .expect("ingest");

    assert_eq!(report.chunks, 0);
    assert_eq!(embedder.calls(), 0);
    let handle = index.get_collection("context").await.expect("created");
    assert_eq!(index.count(&handle).await.expect("count"), 0);
}

#[tokio::test]
async fn zero_chunk_size_is_invalid() {
    let embedder = Arc::new(FakeEmbedder::new(4));
    let index = Arc::new(MemoryIndex::new());

    let result = pipeline(embedder, index.clone(), 0, 1)
        .ingest("one two", "context", IngestOptions::default())
        .await;

    assert!(matches!(result, Err(QaError::InvalidConfiguration(_))));
    assert!(index.list_collections().await.expect("list").is_empty());
}

#[tokio::test]
async fn existing_collection_is_not_overwritten() {
    let embedder = Arc::new(FakeEmbedder::new(4));
    let index = Arc::new(MemoryIndex::new());
    let pipeline = pipeline(embedder, index.clone(), 2, 1);

    pipeline
        .ingest("one two three", "context", IngestOptions::default())
        .await
        .expect("first ingest");

    let again = pipeline
        .ingest("four five", "context", IngestOptions::default())
        .await;
    assert!(matches!(again, Err(QaError::CollectionAlreadyExists(name)) if name == "context"));

    let replaced = pipeline
        .ingest(
            "four five",
            "context",
            IngestOptions {
                replace_existing: true,
            },
        )
        .await
        .expect("replace");
    assert_eq!(replaced.chunks, 1);
    assert_eq!(
        stored_documents(&index, "context").await,
        vec![("chunk_0".to_string(), "four five".to_string())]
    );
}

#[tokio::test]
async fn replace_creates_missing_collection() {
    let embedder = Arc::new(FakeEmbedder::new(4));
    let index = Arc::new(MemoryIndex::new());

    let report = pipeline(embedder, index, 2, 1)
        .ingest(
            "alpha beta",
            "fresh",
            IngestOptions {
                replace_existing: true,
            },
        )
        .await
        .expect("ingest");
    assert_eq!(report.chunks, 1);
}

#[tokio::test]
async fn embedding_failure_keeps_earlier_chunks() {
    let embedder = Arc::new(FakeEmbedder::new(4).failing_on("c d"));
    let index = Arc::new(MemoryIndex::new());

    let result = pipeline(embedder, index.clone(), 2, 1)
        .ingest("a a b b c d e e", "context", IngestOptions::default())
        .await;

    assert!(matches!(result, Err(QaError::EmbeddingFailure(_))));
    assert_eq!(
        stored_documents(&index, "context").await,
        vec![
            ("chunk_0".to_string(), "a a".to_string()),
            ("chunk_1".to_string(), "b b".to_string()),
        ]
    );
}

#[tokio::test]
async fn concurrent_embedding_preserves_order() {
    let text = (0..40).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
    let index_a = Arc::new(MemoryIndex::new());
    let index_b = Arc::new(MemoryIndex::new());

    let sequential = pipeline(Arc::new(FakeEmbedder::new(3)), index_a.clone(), 3, 1)
        .ingest(&text, "seq", IngestOptions::default())
        .await
        .expect("sequential");
    let concurrent = pipeline(Arc::new(FakeEmbedder::new(3)), index_b.clone(), 3, 8)
        .ingest(&text, "par", IngestOptions::default())
        .await
        .expect("concurrent");

    assert_eq!(sequential.chunks, 14);
    assert_eq!(sequential.chunks, concurrent.chunks);
    assert_eq!(
        stored_documents(&index_a, "seq").await,
        stored_documents(&index_b, "par").await
    );
}

#[tokio::test]
async fn dimension_mismatch_is_embedding_failure() {
    let mut embedder = FakeEmbedder::new(4);
    embedder.wrong_dimension = true;
    let index = Arc::new(MemoryIndex::new());

    let result = pipeline(Arc::new(embedder), index, 10, 1)
        .ingest("some words", "context", IngestOptions::default())
        .await;
    assert!(matches!(result, Err(QaError::EmbeddingFailure(_))));
}
