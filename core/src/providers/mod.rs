//! Provider dispatch: the one polymorphic surface of the crate.
//!
//! Each backend implements [`Provider`]; callers never reach into a
//! provider's internals. A provider accepts one outstanding stream at a
//! time — callers serialize streams per provider, and `stream()` rejects
//! a second concurrent one rather than corrupting state.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::task::Context;
use std::task::Poll;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use trellis_protocol::Request;
use trellis_protocol::Response;
use trellis_protocol::StreamEvent;

use crate::error::Error;
use crate::error::Result;
use crate::http::STREAM_IDLE_TIMEOUT;
use crate::http::StreamMachine;
use crate::http::retry_after_secs;
use crate::http::run_sse_stream;
use crate::util::backoff;

pub mod anthropic;
pub mod google;
pub mod openai;

/// Default retry budget for transient request failures.
pub(crate) const DEFAULT_REQUEST_MAX_RETRIES: u64 = 4;

/// Send a request, retrying 429s, 5xx and transport errors with
/// exponential backoff. A `Retry-After` header overrides the computed
/// delay. Non-retryable statuses and the final failing attempt are
/// returned to the caller for categorization.
pub(crate) async fn send_with_retries<F>(
    build_request: F,
    max_retries: u64,
) -> Result<reqwest::Response>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match build_request().send().await {
            Ok(response) => {
                let status = response.status();
                let retryable = status == reqwest::StatusCode::TOO_MANY_REQUESTS
                    || status.is_server_error();
                if status.is_success() || !retryable || attempt > max_retries {
                    return Ok(response);
                }
                let delay = retry_after_secs(response.headers())
                    .map(std::time::Duration::from_secs)
                    .unwrap_or_else(|| backoff(attempt));
                tracing::debug!("retrying after {status} (attempt {attempt}): {delay:?}");
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if attempt > max_retries {
                    return Err(e.into());
                }
                tokio::time::sleep(backoff(attempt)).await;
            }
        }
    }
}

/// The three backends this crate fronts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Google,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Google => "google",
        }
    }
}

/// Infer the provider from a model-name prefix. Matching is
/// case-sensitive; unknown prefixes return `None`.
pub fn infer_provider(model: &str) -> Option<ProviderKind> {
    if model.starts_with("gpt-")
        || model.starts_with("o1-")
        || model.starts_with("o3-")
        || model == "o3"
    {
        return Some(ProviderKind::OpenAi);
    }
    if model.starts_with("claude-") {
        return Some(ProviderKind::Anthropic);
    }
    if model.starts_with("gemini-") {
        return Some(ProviderKind::Google);
    }
    None
}

/// A stream of normalized events for one request.
///
/// The stream ends after exactly one terminal event (`Done` or `Error`),
/// or without one if the stream was cancelled.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<StreamEvent>,
}

impl EventStream {
    pub(crate) fn new(rx: mpsc::Receiver<StreamEvent>) -> Self {
        Self { rx }
    }
}

impl Stream for EventStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// The unified provider interface.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Issue a non-streaming request. Serialization and validation
    /// errors surface here synchronously; once the request is on the
    /// wire, the returned future resolves exactly once with either the
    /// parsed response or a categorized error.
    async fn complete(&self, request: &Request) -> Result<Response>;

    /// Issue a streaming request. Events arrive on the returned
    /// [`EventStream`]; the handshake itself can fail synchronously.
    async fn stream(&self, request: &Request) -> Result<EventStream>;

    /// Abort the active stream, if any. No further events are forwarded;
    /// the stream simply ends.
    fn cancel(&self);
}

impl std::fmt::Debug for dyn Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider").field("name", &self.name()).finish()
    }
}

/// Tracks the single allowed in-flight stream per provider.
#[derive(Debug, Default)]
pub(crate) struct StreamGuard {
    active: Mutex<Option<ActiveStream>>,
}

#[derive(Debug)]
struct ActiveStream {
    cancel: CancellationToken,
    finished: Arc<AtomicBool>,
}

impl StreamGuard {
    /// Reject a second concurrent stream on the same provider.
    pub(crate) fn ensure_idle(&self) -> Result<()> {
        let guard = self.lock();
        if let Some(active) = guard.as_ref()
            && !active.finished.load(Ordering::SeqCst)
            && !active.cancel.is_cancelled()
        {
            return Err(Error::InvalidRequest(
                "a stream is already active on this provider".to_string(),
            ));
        }
        Ok(())
    }

    fn register(&self) -> (CancellationToken, Arc<AtomicBool>) {
        let cancel = CancellationToken::new();
        let finished = Arc::new(AtomicBool::new(false));
        *self.lock() = Some(ActiveStream {
            cancel: cancel.clone(),
            finished: finished.clone(),
        });
        (cancel, finished)
    }

    pub(crate) fn cancel_active(&self) {
        if let Some(active) = self.lock().take() {
            active.cancel.cancel();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<ActiveStream>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Spawn the pump task for a successfully established streaming
/// response and hand back the caller's event stream.
pub(crate) fn spawn_stream<M>(
    response: reqwest::Response,
    machine: M,
    guard: &StreamGuard,
) -> EventStream
where
    M: StreamMachine + 'static,
{
    let (tx, rx) = mpsc::channel::<StreamEvent>(1600);
    let (cancel, finished) = guard.register();
    let byte_stream = response.bytes_stream();
    tokio::spawn(async move {
        run_sse_stream(byte_stream, machine, tx.clone(), cancel, STREAM_IDLE_TIMEOUT).await;
        // Mark the slot free before the channel closes so a caller that
        // drained the stream can immediately start the next one.
        finished.store(true, Ordering::SeqCst);
        drop(tx);
    });
    EventStream::new(rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_openai_prefixes() {
        assert_eq!(infer_provider("gpt-4o"), Some(ProviderKind::OpenAi));
        assert_eq!(infer_provider("gpt-5-mini"), Some(ProviderKind::OpenAi));
        assert_eq!(infer_provider("o1-preview"), Some(ProviderKind::OpenAi));
        assert_eq!(infer_provider("o3-mini"), Some(ProviderKind::OpenAi));
        assert_eq!(infer_provider("o3"), Some(ProviderKind::OpenAi));
    }

    #[test]
    fn infers_anthropic_and_google() {
        assert_eq!(
            infer_provider("claude-sonnet-4-5"),
            Some(ProviderKind::Anthropic)
        );
        assert_eq!(
            infer_provider("gemini-2.5-flash"),
            Some(ProviderKind::Google)
        );
    }

    #[test]
    fn unknown_and_case_mismatch_return_none() {
        assert_eq!(infer_provider("llama-3"), None);
        assert_eq!(infer_provider("GPT-4"), None);
        assert_eq!(infer_provider("Claude-3"), None);
        assert_eq!(infer_provider(""), None);
        // Bare prefixes other than the documented "o3" exception.
        assert_eq!(infer_provider("o1"), None);
    }

    #[test]
    fn stream_guard_rejects_second_stream() {
        let guard = StreamGuard::default();
        assert!(guard.ensure_idle().is_ok());

        let (_cancel, finished) = guard.register();
        assert!(guard.ensure_idle().is_err());

        finished.store(true, Ordering::SeqCst);
        assert!(guard.ensure_idle().is_ok());
    }

    #[test]
    fn stream_guard_cancel_clears_active() {
        let guard = StreamGuard::default();
        let (cancel, _finished) = guard.register();
        assert!(guard.ensure_idle().is_err());

        guard.cancel_active();
        assert!(cancel.is_cancelled());
        assert!(guard.ensure_idle().is_ok());
    }
}
