//! Retrieval-augmented inference.
//!
//! [`InferenceEngine::answer`] returns a lazy stream: nothing happens until it is polled, and
//! dropping it releases the upstream completion stream. Each answer moves through
//! embedding, retrieval, prompt assembly and streaming completion, and a successful answer
//! always ends with exactly one empty-string fragment.

pub mod prompt;

#[cfg(test)]
mod tests;

use futures::StreamExt;
use futures::stream::{self, BoxStream};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::completion::{CompletionClient, CompletionEvent, CompletionStream};
use crate::config::Config;
use crate::config::{DEFAULT_COLLECTION, DEFAULT_TOP_K};
use crate::database::{RetrievedDocument, VectorIndex};
use crate::embeddings::EmbeddingClient;
use crate::{QaError, Result};

pub use prompt::{NO_RETRIEVED_CONTEXT, Persona, assemble_context, build_messages};

/// Answer fragments in arrival order; `Ok("")` marks completion, an `Err` ends the stream
pub type AnswerStream = BoxStream<'static, Result<String>>;

/// Shared, cheaply cloneable inference engine
#[derive(Clone)]
pub struct InferenceEngine {
    embedder: Arc<dyn EmbeddingClient>,
    index: Arc<dyn VectorIndex>,
    completion: Arc<dyn CompletionClient>,
    persona: Persona,
    collection: String,
    top_k: usize,
}

impl std::fmt::Debug for InferenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceEngine")
            .field("persona", &self.persona)
            .field("collection", &self.collection)
            .field("top_k", &self.top_k)
            .finish_non_exhaustive()
    }
}

enum AnswerState {
    Pending {
        engine: InferenceEngine,
        question: String,
    },
    Streaming {
        engine: InferenceEngine,
        question: String,
        events: CompletionStream,
        answer: String,
    },
    Done,
}

impl InferenceEngine {
    #[inline]
    pub fn new(
        embedder: Arc<dyn EmbeddingClient>,
        index: Arc<dyn VectorIndex>,
        completion: Arc<dyn CompletionClient>,
        persona: Persona,
    ) -> Self {
        Self {
            embedder,
            index,
            completion,
            persona,
            collection: DEFAULT_COLLECTION.to_string(),
            top_k: DEFAULT_TOP_K,
        }
    }

    /// Engine reading the configured collection with the configured persona and top-K
    #[inline]
    pub fn from_config(
        config: &Config,
        embedder: Arc<dyn EmbeddingClient>,
        index: Arc<dyn VectorIndex>,
        completion: Arc<dyn CompletionClient>,
    ) -> Self {
        Self::new(embedder, index, completion, config.persona.clone())
            .with_collection(config.index.collection.clone())
            .with_top_k(config.index.top_k)
    }

    #[inline]
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    #[inline]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    #[inline]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    #[inline]
    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    /// Stream the answer to `question`
    #[inline]
    pub fn answer(&self, question: impl Into<String>) -> AnswerStream {
        let state = AnswerState::Pending {
            engine: self.clone(),
            question: question.into(),
        };
        stream::unfold(state, next_fragment).boxed()
    }

    /// Embed `question` and fetch its nearest documents
    #[inline]
    pub async fn retrieve(&self, question: &str) -> Result<Vec<RetrievedDocument>> {
        let vector = self.embedder.embed(question).await.map_err(|e| {
            error!(
                "Embedding failed for question {:?} (collection {}): {}",
                question, self.collection, e
            );
            match e {
                QaError::EmbeddingFailure(_) => e,
                other => QaError::EmbeddingFailure(other.to_string()),
            }
        })?;

        let documents = async {
            let handle = self.index.get_collection(&self.collection).await?;
            self.index.query(&handle, &vector, self.top_k).await
        }
        .await
        .inspect_err(|e| {
            error!(
                "Retrieval failed for question {:?} (collection {}): {}",
                question, self.collection, e
            );
        })?;

        debug!(
            "Retrieved {} documents from {} for question {:?}",
            documents.len(),
            self.collection,
            question
        );
        Ok(documents)
    }

    async fn open_stream(&self, question: &str) -> Result<CompletionStream> {
        let documents = self.retrieve(question).await?;
        let context = assemble_context(&documents);
        let messages = build_messages(&self.persona, &context, question);

        self.completion
            .stream_chat(&messages)
            .await
            .map_err(|e| {
                error!(
                    "Completion stream failed to open for question {:?} (collection {}): {}",
                    question, self.collection, e
                );
                match e {
                    QaError::InferenceStreamFailure(_) => e,
                    other => QaError::InferenceStreamFailure(other.to_string()),
                }
            })
    }
}

async fn next_fragment(mut state: AnswerState) -> Option<(Result<String>, AnswerState)> {
    loop {
        state = match state {
            AnswerState::Pending { engine, question } => {
                match engine.open_stream(&question).await {
                    Ok(events) => AnswerState::Streaming {
                        engine,
                        question,
                        events,
                        answer: String::new(),
                    },
                    Err(e) => return Some((Err(e), AnswerState::Done)),
                }
            }
            AnswerState::Streaming {
                engine,
                question,
                mut events,
                mut answer,
            } => match events.next().await {
                Some(CompletionEvent::Delta(text)) => {
                    answer.push_str(&text);
                    let state = AnswerState::Streaming {
                        engine,
                        question,
                        events,
                        answer,
                    };
                    return Some((Ok(text), state));
                }
                Some(CompletionEvent::EmptyDelta) => AnswerState::Streaming {
                    engine,
                    question,
                    events,
                    answer,
                },
                Some(CompletionEvent::End) | None => {
                    info!("Question: {}", question);
                    info!("Answer: {}", answer);
                    return Some((Ok(String::new()), AnswerState::Done));
                }
                Some(CompletionEvent::Failed(message)) => {
                    error!(
                        "Completion stream failed for question {:?} (collection {}) after {} bytes: {}",
                        question,
                        engine.collection,
                        answer.len(),
                        message
                    );
                    return Some((
                        Err(QaError::InferenceStreamFailure(message)),
                        AnswerState::Done,
                    ));
                }
            },
            AnswerState::Done => return None,
        };
    }
}
