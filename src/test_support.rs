// Fake capabilities shared by unit tests

use async_trait::async_trait;
use futures::{StreamExt, stream};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::completion::{ChatMessage, CompletionClient, CompletionEvent, CompletionStream};
use crate::embeddings::EmbeddingClient;
use crate::{QaError, Result};

pub const DIMENSION: usize = 8;

/// Bag-of-words embedder: each word bumps one of `DIMENSION` buckets
#[derive(Debug, Default)]
pub struct WordBucketEmbedder {
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
}

impl WordBucketEmbedder {
    pub fn failing() -> Self {
        let embedder = Self::default();
        embedder.fail.store(true, Ordering::SeqCst);
        embedder
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; DIMENSION];
        for word in text.split_whitespace() {
            let word = word.to_lowercase();
            let bucket = word.bytes().map(usize::from).sum::<usize>() % DIMENSION;
            vector[bucket] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl EmbeddingClient for WordBucketEmbedder {
    fn dimension(&self) -> usize {
        DIMENSION
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(QaError::EmbeddingFailure("transport error".to_string()));
        }
        Ok(Self::vector(text))
    }
}

/// Sets a flag when dropped
#[derive(Debug)]
pub struct DropFlag(pub Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Completion client replaying a fixed script of events
#[derive(Debug, Default)]
pub struct ScriptedCompletion {
    pub script: Vec<CompletionEvent>,
    /// Keep the stream open after the script instead of ending it
    pub hang: bool,
    pub open_error: Option<String>,
    pub requests: Mutex<Vec<Vec<ChatMessage>>>,
    pub released: Arc<AtomicBool>,
}

impl ScriptedCompletion {
    pub fn new(script: Vec<CompletionEvent>) -> Self {
        Self {
            script,
            ..Self::default()
        }
    }

    pub fn hanging(script: Vec<CompletionEvent>) -> Self {
        Self {
            script,
            hang: true,
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<CompletionStream> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(messages.to_vec());

        if let Some(message) = &self.open_error {
            return Err(QaError::InferenceStreamFailure(message.clone()));
        }

        let guard = DropFlag(self.released.clone());
        let events = stream::iter(self.script.clone());
        let events = if self.hang {
            events.chain(stream::pending()).boxed()
        } else {
            events.boxed()
        };

        Ok(events
            .map(move |event| {
                let _alive = &guard;
                event
            })
            .boxed())
    }
}
