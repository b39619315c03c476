//! Streaming delivery of answers.
//!
//! [`subscribe`] relays an answer to a listener through a bounded channel and stops the
//! upstream work as soon as the listener cancels or goes away. [`QueryServer`] exposes
//! subscriptions over line-delimited JSON on stdio.

pub mod protocol;


use anyhow::Context;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::QaError;
use crate::inference::InferenceEngine;

pub use protocol::{ClientMessage, ServerMessage, parse_client_message};

/// Events buffered between the answering task and a slow listener
const SUBSCRIPTION_BUFFER: usize = 32;
/// Lines buffered before the stdout writer
const OUTPUT_BUFFER: usize = 256;

#[derive(Debug)]
pub enum SubscriptionEvent {
    Fragment(String),
    /// The answer is complete; corresponds to the empty-string sentinel
    Complete,
    Failed(QaError),
}

impl SubscriptionEvent {
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Fragment(_))
    }
}

/// Live answer to one question. Dropping it cancels the answer.
#[derive(Debug)]
pub struct Subscription {
    events: mpsc::Receiver<SubscriptionEvent>,
    cancel: CancellationToken,
}

impl Subscription {
    /// Next event; `None` once the answer has ended or was cancelled
    #[inline]
    pub async fn recv(&mut self) -> Option<SubscriptionEvent> {
        self.events.recv().await
    }

    /// Stop the answer; no further events are delivered
    #[inline]
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.events.close();
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Start answering `question` in a background task
#[inline]
pub fn subscribe(engine: &InferenceEngine, question: impl Into<String>) -> Subscription {
    let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
    let cancel = CancellationToken::new();
    let answer = engine.answer(question);
    let token = cancel.clone();

    tokio::spawn(async move {
        let mut answer = answer;

        loop {
            let item = tokio::select! {
                biased;
                () = token.cancelled() => {
                    debug!("Subscription cancelled, releasing answer stream");
                    break;
                }
                item = answer.next() => item,
            };

            let event = match item {
                Some(Ok(fragment)) if fragment.is_empty() => SubscriptionEvent::Complete,
                Some(Ok(fragment)) => SubscriptionEvent::Fragment(fragment),
                Some(Err(e)) => SubscriptionEvent::Failed(e),
                None => break,
            };
            let terminal = event.is_terminal();

            let sent = tokio::select! {
                biased;
                () = token.cancelled() => break,
                sent = tx.send(event) => sent,
            };

            if sent.is_err() {
                debug!("Subscriber went away, releasing answer stream");
                break;
            }
            if terminal {
                break;
            }
        }
    });

    Subscription { events: rx, cancel }
}

type InFlight = Arc<Mutex<HashMap<String, CancellationToken>>>;

/// Query endpoint speaking line-delimited JSON
#[derive(Debug, Clone)]
pub struct QueryServer {
    engine: InferenceEngine,
}

impl QueryServer {
    #[inline]
    pub fn new(engine: InferenceEngine) -> Self {
        Self { engine }
    }

    /// Serve requests from stdin until EOF, answers go to stdout
    #[inline]
    pub async fn serve_stdio(&self) -> anyhow::Result<()> {
        info!(
            "Starting query server on stdio (collection: {})",
            self.engine.collection()
        );
        self.serve(BufReader::new(io::stdin()), io::stdout()).await
    }

    /// Serve requests read from `reader`, writing responses to `writer`.
    ///
    /// Questions are answered concurrently. EOF cancels everything still in flight.
    #[inline]
    pub async fn serve<R, W>(&self, mut reader: R, writer: W) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (out_tx, out_rx) = mpsc::channel(OUTPUT_BUFFER);
        let writer_task = tokio::spawn(write_messages(writer, out_rx));
        let in_flight: InFlight = Arc::default();

        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    info!("EOF reached, cancelling in-flight questions");
                    break;
                }
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    let reply = match parse_client_message(trimmed) {
                        Ok(ClientMessage::Ask { id, question }) => {
                            self.start_question(id, question, &in_flight, &out_tx)
                        }
                        Ok(ClientMessage::Cancel { id }) => cancel_question(&id, &in_flight),
                        Err(message) => {
                            warn!("Rejected request line: {}", message);
                            Some(ServerMessage::invalid_request(None, message))
                        }
                    };

                    if let Some(reply) = reply {
                        if out_tx.send(reply).await.is_err() {
                            error!("Output closed, stopping query server");
                            break;
                        }
                    }
                }
                Err(e) => {
                    error!("Error reading request: {}", e);
                    break;
                }
            }
        }

        let pending: Vec<CancellationToken> =
            lock(&in_flight).drain().map(|(_, token)| token).collect();
        for token in pending {
            token.cancel();
        }
        drop(out_tx);

        writer_task.await.context("Output writer task failed")??;
        info!("Query server stopped");
        Ok(())
    }

    fn start_question(
        &self,
        id: Option<String>,
        question: String,
        in_flight: &InFlight,
        out_tx: &mpsc::Sender<ServerMessage>,
    ) -> Option<ServerMessage> {
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let token = CancellationToken::new();

        {
            let mut in_flight = lock(in_flight);
            if in_flight.contains_key(&id) {
                return Some(ServerMessage::invalid_request(
                    Some(id),
                    "a question with this id is already in flight",
                ));
            }
            in_flight.insert(id.clone(), token.clone());
        }

        debug!("Answering question {}: {:?}", id, question);
        let subscription = subscribe(&self.engine, question);
        tokio::spawn(relay(
            id,
            subscription,
            token,
            Arc::clone(in_flight),
            out_tx.clone(),
        ));
        None
    }
}

fn cancel_question(id: &str, in_flight: &InFlight) -> Option<ServerMessage> {
    let token = lock(in_flight).remove(id);
    match token {
        Some(token) => {
            debug!("Cancelling question {}", id);
            // The relay acknowledges once it has stopped forwarding
            token.cancel();
            None
        }
        None => Some(ServerMessage::invalid_request(
            Some(id.to_string()),
            "no question with this id is in flight",
        )),
    }
}

/// Forward one subscription to the output until it ends or is cancelled
async fn relay(
    id: String,
    mut subscription: Subscription,
    token: CancellationToken,
    in_flight: InFlight,
    out_tx: mpsc::Sender<ServerMessage>,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = token.cancelled() => {
                subscription.cancel();
                let _ = out_tx.send(ServerMessage::Cancelled { id: id.clone() }).await;
                return;
            }
            event = subscription.recv() => event,
        };

        let message = match event {
            Some(SubscriptionEvent::Fragment(data)) => ServerMessage::fragment(&id, data),
            Some(SubscriptionEvent::Complete) => ServerMessage::fragment(&id, ""),
            Some(SubscriptionEvent::Failed(e)) => {
                ServerMessage::error(Some(id.clone()), e.kind(), e.to_string())
            }
            None => {
                warn!("Answer for {} ended without a terminal event", id);
                break;
            }
        };
        let terminal = !matches!(&message, ServerMessage::Fragment { data, .. } if !data.is_empty());

        if out_tx.send(message).await.is_err() {
            break;
        }
        if terminal {
            break;
        }
    }

    lock(&in_flight).remove(&id);
}

async fn write_messages<W>(
    mut writer: W,
    mut messages: mpsc::Receiver<ServerMessage>,
) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = messages.recv().await {
        let json = serde_json::to_string(&message)?;
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}

fn lock(in_flight: &InFlight) -> std::sync::MutexGuard<'_, HashMap<String, CancellationToken>> {
    in_flight
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
