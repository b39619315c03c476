use super::*;
use crate::completion::{ChatMessage, Role};
use crate::database::{IndexedRecord, MemoryIndex};
use crate::test_support::{ScriptedCompletion, WordBucketEmbedder};

const PROFILE: [&str; 4] = [
    "I studied mathematics at university",
    "I write compilers and programming languages",
    "My favourite food is pasta",
    "I live in London near the river",
];

async fn seeded_index(documents: &[&str]) -> Arc<MemoryIndex> {
    let index = Arc::new(MemoryIndex::new());
    let handle = index
        .create_collection("context", crate::test_support::DIMENSION)
        .await
        .expect("create");
    let records = documents
        .iter()
        .enumerate()
        .map(|(position, text)| IndexedRecord {
            id: format!("chunk_{position}"),
            embedding: WordBucketEmbedder::vector(text),
            document: (*text).to_string(),
            position: position as u32,
            source_offset: 0,
        })
        .collect();
    index.add(&handle, records).await.expect("add");
    index
}

fn engine(
    embedder: Arc<WordBucketEmbedder>,
    index: Arc<MemoryIndex>,
    completion: Arc<ScriptedCompletion>,
) -> InferenceEngine {
    InferenceEngine::new(embedder, index, completion, Persona::named("Ada"))
}

fn deltas(parts: &[&str]) -> Vec<CompletionEvent> {
    parts
        .iter()
        .map(|p| CompletionEvent::Delta((*p).to_string()))
        .chain(std::iter::once(CompletionEvent::End))
        .collect()
}

async fn collect(stream: AnswerStream) -> Vec<std::result::Result<String, String>> {
    stream
        .map(|item| item.map_err(|e| e.kind().to_string()))
        .collect()
        .await
}

#[tokio::test]
async fn streams_fragments_then_sentinel() {
    let completion = Arc::new(ScriptedCompletion::new(deltas(&["I write", " compilers."])));
    let engine = engine(
        Arc::new(WordBucketEmbedder::default()),
        seeded_index(&PROFILE).await,
        completion.clone(),
    );

    let fragments = collect(engine.answer("What do you write?")).await;
    assert_eq!(
        fragments,
        vec![
            Ok("I write".to_string()),
            Ok(" compilers.".to_string()),
            Ok(String::new()),
        ]
    );

    let requests = completion.requests();
    assert_eq!(requests.len(), 1);
    let messages = &requests[0];
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0], ChatMessage::system(Persona::named("Ada").system_instruction()));
    assert_eq!(messages[1].role, Role::System);
    assert!(messages[1].content.starts_with("Context:\n"));
    assert_eq!(messages[2], ChatMessage::user("What do you write?"));
}

#[tokio::test]
async fn context_holds_top_k_in_rank_order() {
    let completion = Arc::new(ScriptedCompletion::new(deltas(&["ok"])));
    let engine = engine(
        Arc::new(WordBucketEmbedder::default()),
        seeded_index(&PROFILE).await,
        completion.clone(),
    )
    .with_top_k(2);

    let question = "I write compilers and programming languages";
    let retrieved = engine.retrieve(question).await.expect("retrieve");
    assert_eq!(retrieved.len(), 2);
    assert_eq!(retrieved[0].document, PROFILE[1]);

    let _ = collect(engine.answer(question)).await;
    let context = &completion.requests()[0][1].content;
    let expected = format!(
        "Context:\n{}\n\n{}",
        retrieved[0].document, retrieved[1].document
    );
    assert_eq!(context, &expected);
}

#[tokio::test]
async fn empty_collection_uses_sentinel_context() {
    let completion = Arc::new(ScriptedCompletion::new(deltas(&["Hello"])));
    let engine = engine(
        Arc::new(WordBucketEmbedder::default()),
        seeded_index(&[]).await,
        completion.clone(),
    );

    let fragments = collect(engine.answer("anything?")).await;
    assert_eq!(fragments, vec![Ok("Hello".to_string()), Ok(String::new())]);
    assert_eq!(
        completion.requests()[0][1].content,
        "Context:\nNo retrieved context."
    );
}

#[tokio::test]
async fn whitespace_deltas_are_dropped() {
    let completion = Arc::new(ScriptedCompletion::new(vec![
        CompletionEvent::EmptyDelta,
        CompletionEvent::Delta("Hi".to_string()),
        CompletionEvent::EmptyDelta,
        CompletionEvent::Delta(" there".to_string()),
        CompletionEvent::End,
    ]));
    let engine = engine(
        Arc::new(WordBucketEmbedder::default()),
        seeded_index(&PROFILE).await,
        completion,
    );

    let fragments = collect(engine.answer("hi")).await;
    assert_eq!(
        fragments,
        vec![
            Ok("Hi".to_string()),
            Ok(" there".to_string()),
            Ok(String::new())
        ]
    );
}

#[tokio::test]
async fn upstream_close_still_emits_sentinel() {
    let completion = Arc::new(ScriptedCompletion::new(vec![CompletionEvent::Delta(
        "partial".to_string(),
    )]));
    let engine = engine(
        Arc::new(WordBucketEmbedder::default()),
        seeded_index(&PROFILE).await,
        completion,
    );

    let fragments = collect(engine.answer("hi")).await;
    assert_eq!(fragments, vec![Ok("partial".to_string()), Ok(String::new())]);
}

#[tokio::test]
async fn embedding_failure_emits_nothing() {
    let embedder = Arc::new(WordBucketEmbedder::failing());
    let completion = Arc::new(ScriptedCompletion::new(deltas(&["never"])));
    let engine = engine(embedder.clone(), seeded_index(&PROFILE).await, completion.clone());

    let fragments = collect(engine.answer("Who are you?")).await;
    assert_eq!(fragments, vec![Err("EmbeddingFailure".to_string())]);
    assert_eq!(embedder.calls(), 1);
    assert!(completion.requests().is_empty());
}

#[tokio::test]
async fn missing_collection_is_terminal() {
    let completion = Arc::new(ScriptedCompletion::new(deltas(&["never"])));
    let engine = engine(
        Arc::new(WordBucketEmbedder::default()),
        seeded_index(&PROFILE).await,
        completion.clone(),
    )
    .with_collection("missing");

    let fragments = collect(engine.answer("Who are you?")).await;
    assert_eq!(fragments, vec![Err("CollectionNotFound".to_string())]);
    assert!(completion.requests().is_empty());
}

#[tokio::test]
async fn mid_stream_failure_keeps_partial_answer() {
    let completion = Arc::new(ScriptedCompletion::new(vec![
        CompletionEvent::Delta("I was".to_string()),
        CompletionEvent::Failed("connection reset".to_string()),
        CompletionEvent::Delta("ignored".to_string()),
    ]));
    let engine = engine(
        Arc::new(WordBucketEmbedder::default()),
        seeded_index(&PROFILE).await,
        completion,
    );

    let fragments = collect(engine.answer("hi")).await;
    assert_eq!(
        fragments,
        vec![
            Ok("I was".to_string()),
            Err("InferenceStreamFailure".to_string())
        ]
    );
}

#[tokio::test]
async fn open_failure_is_stream_failure() {
    let completion = Arc::new(ScriptedCompletion {
        open_error: Some("HTTP 500".to_string()),
        ..ScriptedCompletion::default()
    });
    let engine = engine(
        Arc::new(WordBucketEmbedder::default()),
        seeded_index(&PROFILE).await,
        completion,
    );

    let fragments = collect(engine.answer("hi")).await;
    assert_eq!(fragments, vec![Err("InferenceStreamFailure".to_string())]);
}

#[tokio::test]
async fn answer_is_lazy_and_drop_releases_upstream() {
    let embedder = Arc::new(WordBucketEmbedder::default());
    let completion = Arc::new(ScriptedCompletion::hanging(vec![CompletionEvent::Delta(
        "first".to_string(),
    )]));
    let engine = engine(embedder.clone(), seeded_index(&PROFILE).await, completion.clone());

    let mut stream = engine.answer("hi");
    assert_eq!(embedder.calls(), 0);

    let first = stream.next().await.expect("fragment").expect("ok");
    assert_eq!(first, "first");
    assert_eq!(embedder.calls(), 1);
    assert!(!completion.released());

    drop(stream);
    assert!(completion.released());
}

#[test]
fn from_config_uses_index_settings() {
    let mut config = Config::default();
    config.index.collection = "profile".to_string();
    config.index.top_k = 5;
    config.persona = Persona::named("Ada");

    let engine = InferenceEngine::from_config(
        &config,
        Arc::new(WordBucketEmbedder::default()),
        Arc::new(MemoryIndex::new()),
        Arc::new(ScriptedCompletion::default()),
    );
    assert_eq!(engine.collection(), "profile");
    assert_eq!(engine.top_k, 5);
    assert_eq!(engine.persona().name.as_deref(), Some("Ada"));
}

#[test]
fn defaults_match_configuration_defaults() {
    let engine = engine(
        Arc::new(WordBucketEmbedder::default()),
        Arc::new(MemoryIndex::new()),
        Arc::new(ScriptedCompletion::default()),
    );
    let config = Config::default();

    assert_eq!(engine.collection(), config.index.collection);
    assert_eq!(engine.top_k, config.index.top_k);
}
