
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tracing::{debug, error, warn};
use url::Url;

use super::{ChatMessage, CompletionClient, CompletionEvent, CompletionStream};
use crate::config::Config;
use crate::{QaError, Result};

/// Streaming chat-completion client for the OpenAI `/chat/completions` endpoint
#[derive(Clone)]
pub struct OpenAiChatClient {
    client: reqwest::Client,
    endpoint: Url,
    api_key: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    error: Option<ChunkError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkError {
    message: String,
}

impl std::fmt::Debug for OpenAiChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiChatClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl OpenAiChatClient {
    #[inline]
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = config.require_api_key()?.to_string();
        let endpoint = config
            .openai
            .api_url()?
            .join("chat/completions")
            .map_err(|e| {
                QaError::InvalidConfiguration(format!("Invalid chat completions URL: {}", e))
            })?;

        // Only the connect phase is bounded, answers may stream for a long time
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.openai.timeout_secs))
            .build()
            .map_err(|e| QaError::InvalidConfiguration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            api_key,
            model: config.openai.chat_model.clone(),
        })
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl CompletionClient for OpenAiChatClient {
    #[inline]
    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<CompletionStream> {
        debug!(
            "Opening chat completion stream with {} messages (model: {})",
            messages.len(),
            self.model
        );

        let request = ChatRequest {
            model: &self.model,
            messages,
            stream: true,
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Chat completion request to {} failed: {}", self.endpoint, e);
                QaError::InferenceStreamFailure(format!("chat completion request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Chat completion request rejected: {} {}", status, body);
            return Err(QaError::InferenceStreamFailure(format!(
                "chat completion request failed: {} {}",
                status, body
            )));
        }

        Ok(SseEvents::new(Box::pin(response.bytes_stream())).boxed())
    }
}

/// Server-sent events parser turning a byte stream into [`CompletionEvent`]s.
///
/// Always finishes with exactly one terminal event: `End` when upstream sends `[DONE]` or
/// closes cleanly, `Failed` when the transport or a payload breaks.
pub struct SseEvents<S> {
    inner: S,
    buffer: Vec<u8>,
    pending: VecDeque<CompletionEvent>,
    upstream_done: bool,
    finished: bool,
}

impl<S> SseEvents<S> {
    #[inline]
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            pending: VecDeque::new(),
            upstream_done: false,
            finished: false,
        }
    }
}

impl<S, B, E> Stream for SseEvents<S>
where
    S: Stream<Item = std::result::Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Display,
{
    type Item = CompletionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if self.finished {
                return Poll::Ready(None);
            }

            if let Some(event) = self.pending.pop_front() {
                if event.is_terminal() {
                    self.finished = true;
                }
                return Poll::Ready(Some(event));
            }

            if let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.buffer.drain(..=pos).collect();
                if let Some(event) = parse_sse_line(&line) {
                    self.pending.push_back(event);
                }
                continue;
            }

            if self.upstream_done {
                // Upstream closed without [DONE]: the answer is over
                self.pending.push_back(CompletionEvent::End);
                continue;
            }

            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    self.buffer.extend_from_slice(bytes.as_ref());
                }
                Poll::Ready(Some(Err(err))) => {
                    warn!("Completion stream read error: {}", err);
                    self.pending
                        .push_back(CompletionEvent::Failed(format!("stream read error: {}", err)));
                }
                Poll::Ready(None) => {
                    self.upstream_done = true;
                    let rest = std::mem::take(&mut self.buffer);
                    if let Some(event) = parse_sse_line(&rest) {
                        self.pending.push_back(event);
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Parse one SSE line; comments, blank lines and non-data fields yield `None`
fn parse_sse_line(line: &[u8]) -> Option<CompletionEvent> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();

    if line.is_empty() || line.starts_with(':') {
        return None;
    }

    let data = line.strip_prefix("data:")?.trim();

    if data.is_empty() {
        return None;
    }

    if data == "[DONE]" {
        return Some(CompletionEvent::End);
    }

    match serde_json::from_str::<ChatChunk>(data) {
        Ok(ChatChunk {
            error: Some(error), ..
        }) => Some(CompletionEvent::Failed(error.message)),
        Ok(chunk) => {
            let content = chunk
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.delta.content);
            Some(CompletionEvent::from_content(content))
        }
        Err(err) => {
            warn!("Failed to parse SSE payload: {} - Data: {}", err, data);
            Some(CompletionEvent::Failed(format!(
                "invalid stream payload: {}",
                err
            )))
        }
    }
}
