//! Shared HTTP plumbing for the provider adapters.
//!
//! Non-streaming responses flow through [`HttpCompletion`], which
//! categorizes the HTTP result the same way for every provider.
//! Streaming responses are driven by [`run_sse_stream`]: a pump task
//! that feeds response bytes into the SSE parser and hands complete
//! events to a per-provider [`StreamMachine`], forwarding the normalized
//! events it produces over a channel. The pump guarantees that exactly
//! one terminal event (`Done` or `Error`) is delivered per stream unless
//! the stream is cancelled first.

use bytes::Bytes;
use futures::Stream;
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use trellis_protocol::ErrorCategory;
use trellis_protocol::StreamEvent;

use crate::sse::SseEvent;
use crate::sse::SseParser;

/// How long a silent SSE stream is tolerated before the pump gives up.
pub(crate) const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Categorized outcome of one HTTP transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionKind {
    /// HTTP 200-299.
    Success,
    /// HTTP 400-499.
    ClientError,
    /// HTTP 500-599.
    ServerError,
    /// Connection failed, or an HTTP status outside the known ranges.
    NetworkError,
}

/// Completion information for one finished transfer. The response body
/// is moved in, not copied; it lives as long as the completion.
#[derive(Debug)]
pub struct HttpCompletion {
    pub kind: CompletionKind,
    /// HTTP status code; 0 for pure transport failures.
    pub status: u16,
    pub message: Option<String>,
    pub body: Bytes,
}

impl HttpCompletion {
    pub fn from_response(status: u16, body: Bytes) -> Self {
        let (kind, message) = categorize_status(status);
        Self {
            kind,
            status,
            message,
            body,
        }
    }

    pub fn is_success(&self) -> bool {
        self.kind == CompletionKind::Success
    }
}

pub(crate) fn categorize_status(status: u16) -> (CompletionKind, Option<String>) {
    match status {
        200..=299 => (CompletionKind::Success, None),
        400..=499 => (
            CompletionKind::ClientError,
            Some(format!("HTTP {status} error")),
        ),
        500..=599 => (
            CompletionKind::ServerError,
            Some(format!("HTTP {status} server error")),
        ),
        _ => (
            CompletionKind::NetworkError,
            Some(format!("Unexpected HTTP response code: {status}")),
        ),
    }
}

/// Shared reqwest client with the library's User-Agent.
pub fn create_client() -> reqwest::Client {
    let user_agent = format!("trellis/{}", env!("CARGO_PKG_VERSION"));
    reqwest::Client::builder()
        .user_agent(user_agent)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Parse a `Retry-After` header as whole seconds.
///
/// Header lookup is case-insensitive. Missing, malformed, or
/// non-positive values yield `None` ("no hint").
pub fn retry_after_secs(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    let value = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?;
    let secs = value.trim().parse::<i64>().ok()?;
    if secs <= 0 {
        return None;
    }
    Some(secs as u64)
}

/// A per-provider streaming state machine.
///
/// The pump calls [`StreamMachine::on_event`] once per complete SSE
/// event; the machine appends zero or more normalized events to `out`.
/// Once the machine reports `finished`, no further events are fed or
/// forwarded.
pub(crate) trait StreamMachine: Send {
    fn on_event(&mut self, event: &SseEvent, out: &mut Vec<StreamEvent>);

    /// True once a terminal `Done` or `Error` has been produced.
    fn finished(&self) -> bool;
}

/// Drive a byte stream through the SSE parser and a stream machine,
/// forwarding normalized events to `tx`.
///
/// Termination behavior:
/// - machine reaches a terminal event: pump stops immediately;
/// - the byte stream ends first: a `Network` error event is emitted
///   ("stream closed before completion");
/// - no bytes arrive for `idle_timeout`: a `Timeout` error event;
/// - `cancel` trips: nothing further is forwarded;
/// - the receiver is dropped: the pump exits quietly.
pub(crate) async fn run_sse_stream<S, E, M>(
    mut byte_stream: S,
    mut machine: M,
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
    idle_timeout: Duration,
) where
    S: Stream<Item = Result<Bytes, E>> + Unpin + Send,
    E: std::fmt::Display,
    M: StreamMachine,
{
    let mut parser = SseParser::new();
    let mut out: Vec<StreamEvent> = Vec::new();

    loop {
        let chunk = tokio::select! {
            // Cancellation wins over ready data.
            biased;
            _ = cancel.cancelled() => return,
            chunk = timeout(idle_timeout, byte_stream.next()) => chunk,
        };

        let bytes = match chunk {
            Ok(Some(Ok(bytes))) => bytes,
            Ok(Some(Err(e))) => {
                debug!("transport error mid-stream: {e:#}");
                let _ = tx
                    .send(StreamEvent::Error {
                        category: ErrorCategory::Network,
                        message: e.to_string(),
                    })
                    .await;
                return;
            }
            Ok(None) => {
                if !machine.finished() {
                    let _ = tx
                        .send(StreamEvent::Error {
                            category: ErrorCategory::Network,
                            message: "stream closed before completion".to_string(),
                        })
                        .await;
                }
                return;
            }
            Err(_) => {
                let _ = tx
                    .send(StreamEvent::Error {
                        category: ErrorCategory::Timeout,
                        message: "idle timeout waiting for SSE".to_string(),
                    })
                    .await;
                return;
            }
        };

        parser.feed(&bytes);
        while let Some(event) = parser.next_event() {
            machine.on_event(&event, &mut out);
            for ev in out.drain(..) {
                if tx.send(ev).await.is_err() {
                    return;
                }
            }
            if machine.finished() {
                return;
            }
        }
    }
}
