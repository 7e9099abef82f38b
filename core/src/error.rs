//! Error taxonomy for the provider client.
//!
//! Every error a caller can observe maps to exactly one
//! [`ErrorCategory`] via [`Error::category`]. HTTP statuses map through
//! [`category_for_status`]; when a provider's error body carries a typed
//! error object, the body-level type string overrides the status-derived
//! category (each provider supplies its own string table).

use reqwest::StatusCode;
use std::io;
use thiserror::Error as ThisError;
use trellis_protocol::ErrorCategory;

pub type Result<T> = std::result::Result<T, Error>;

/// A structured, categorized error reported by (or derived from) a
/// provider response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub category: ErrorCategory,
    /// HTTP status, `None` when the failure was not an HTTP response.
    pub http_status: Option<u16>,
    pub message: String,
    /// The provider's own error type/code string, when present.
    pub provider_code: Option<String>,
    /// Retry hint in seconds. `None` means the provider gave no usable
    /// hint (missing, malformed, or non-positive).
    pub retry_after: Option<u64>,
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.http_status {
            Some(status) => write!(f, "provider error (HTTP {status}): {}", self.message),
            None => write!(f, "provider error: {}", self.message),
        }
    }
}

#[derive(Debug, ThisError)]
pub enum Error {
    /// Categorized failure reported by a provider.
    #[error("{0}")]
    Api(ApiError),

    /// The request failed validation before any I/O happened.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A response body or stream payload was not the expected shape.
    #[error("parse error: {0}")]
    Parse(String),

    /// The SSE stream disconnected or misbehaved after the HTTP
    /// handshake succeeded.
    #[error("stream disconnected before completion: {0}")]
    Stream(String),

    /// An HTTP status outside the ranges this client knows how to
    /// categorize.
    #[error("unexpected status {0}: {1}")]
    UnexpectedStatus(StatusCode, String),

    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// The normalized category for this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Api(api) => api.category,
            Error::InvalidRequest(_) => ErrorCategory::InvalidArg,
            Error::Parse(_) => ErrorCategory::Unknown,
            Error::Stream(_) => ErrorCategory::Network,
            Error::UnexpectedStatus(status, _) => category_for_status(status.as_u16()),
            Error::Reqwest(e) if e.is_timeout() => ErrorCategory::Timeout,
            Error::Reqwest(_) => ErrorCategory::Network,
            Error::Json(_) => ErrorCategory::Unknown,
            Error::Io(_) => ErrorCategory::Network,
        }
    }

    /// Retry hint in seconds, when the provider supplied one.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Error::Api(api) => api.retry_after,
            _ => None,
        }
    }
}

/// Default HTTP-status-to-category mapping. Providers refine this with
/// body-level error types and provider-specific status quirks.
pub fn category_for_status(status: u16) -> ErrorCategory {
    match status {
        401 | 403 => ErrorCategory::Auth,
        429 => ErrorCategory::RateLimit,
        400 => ErrorCategory::InvalidArg,
        404 => ErrorCategory::NotFound,
        500 | 502 | 503 | 504 | 529 => ErrorCategory::Server,
        400..=499 => ErrorCategory::Unknown,
        _ => ErrorCategory::Unknown,
    }
}
