use serde::Deserialize;
use serde::Serialize;

use crate::models::FinishReason;
use crate::models::Usage;

/// Normalized error classification shared by every provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Invalid credentials (401, 403).
    Auth,
    /// Rate limit exceeded (429).
    RateLimit,
    /// Bad request (400).
    InvalidArg,
    /// Model or resource not found (404).
    NotFound,
    /// Server-side failure (5xx).
    Server,
    Timeout,
    ContentFilter,
    /// Connection, DNS, or transport failure.
    Network,
    Unknown,
}

/// One normalized event in a streaming response.
///
/// Event ordering per stream: at most one `Start`, emitted before any
/// delta; exactly one `Done` or `Error`, after which nothing else is
/// emitted. Between a `ToolCallStart` for an index and its
/// `ToolCallDone`, every `ToolCallDelta` carries that same index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Start {
        model: Option<String>,
    },
    TextDelta {
        index: u32,
        text: String,
    },
    ThinkingDelta {
        index: u32,
        text: String,
    },
    ToolCallStart {
        index: u32,
        id: Option<String>,
        name: Option<String>,
    },
    ToolCallDelta {
        index: u32,
        arguments: String,
    },
    ToolCallDone {
        index: u32,
    },
    Done {
        finish_reason: FinishReason,
        usage: Usage,
        provider_data: Option<String>,
    },
    Error {
        category: ErrorCategory,
        message: String,
    },
}

impl StreamEvent {
    /// True for the terminal `Done` / `Error` events.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Error { .. })
    }
}
