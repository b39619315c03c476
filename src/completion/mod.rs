//! Streaming chat-completion capability.
//!
//! Upstream responses are normalised into [`CompletionEvent`] so consumers handle every
//! shape a vendor stream can take with one exhaustive `match`.

pub mod openai;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::Result;

pub use openai::{OpenAiChatClient, SseEvents};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[inline]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[inline]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// One item of an upstream completion stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionEvent {
    /// Content with at least one non-whitespace character
    Delta(String),
    /// A chunk without usable content (role headers, usage records, whitespace)
    EmptyDelta,
    /// Upstream signalled the end of the answer
    End,
    /// Upstream failed mid-stream
    Failed(String),
}

impl CompletionEvent {
    /// Classify the optional content carried by a delta
    #[inline]
    pub fn from_content(content: Option<String>) -> Self {
        match content {
            Some(text) if !text.trim().is_empty() => Self::Delta(text),
            _ => Self::EmptyDelta,
        }
    }

    /// Whether no further events follow this one
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::End | Self::Failed(_))
    }
}

/// Stream of completion events; dropping it releases the underlying connection
pub type CompletionStream = BoxStream<'static, CompletionEvent>;

/// Submits a message list and streams back the answer incrementally
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Open a streaming completion. Failing to open the stream is an `InferenceStreamFailure`.
    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<CompletionStream>;
}
