//! Google (Gemini) provider.
//!
//! No auth header: the API key travels as a `key=` query parameter.
//! Streaming uses the `:streamGenerateContent` endpoint with `alt=sse`.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use serde_json::Value;
use trellis_protocol::ErrorCategory;
use trellis_protocol::FinishReason;
use trellis_protocol::Request;
use trellis_protocol::Response;

use crate::error::ApiError;
use crate::error::Error;
use crate::error::Result;
use crate::error::category_for_status;
use crate::http::HttpCompletion;
use crate::http::create_client;

use super::DEFAULT_REQUEST_MAX_RETRIES;
use super::EventStream;
use super::Provider;
use super::StreamGuard;
use super::send_with_retries;
use super::spawn_stream;

mod request;
mod response;
mod stream;

use request::build_url;
use request::serialize_request;
use response::parse_response;
use stream::GoogleStreamMachine;

pub const GOOGLE_BASE_URL: &str = "https://generativelanguage.googleapis.com";

pub(crate) fn map_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "STOP" => FinishReason::Stop,
        "MAX_TOKENS" => FinishReason::Length,
        "SAFETY" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "RECITATION" => {
            FinishReason::ContentFilter
        }
        "MALFORMED_FUNCTION_CALL" | "UNEXPECTED_TOOL_CALL" => FinishReason::Error,
        _ => FinishReason::Unknown,
    }
}

pub(crate) fn category_for_status_string(status: &str) -> ErrorCategory {
    match status {
        "UNAUTHENTICATED" | "PERMISSION_DENIED" => ErrorCategory::Auth,
        "RESOURCE_EXHAUSTED" => ErrorCategory::RateLimit,
        "INVALID_ARGUMENT" | "FAILED_PRECONDITION" => ErrorCategory::InvalidArg,
        "NOT_FOUND" => ErrorCategory::NotFound,
        "INTERNAL" | "UNAVAILABLE" => ErrorCategory::Server,
        "DEADLINE_EXCEEDED" => ErrorCategory::Timeout,
        _ => ErrorCategory::Unknown,
    }
}

/// Gemini maps 504 to timeout; the rest follows the default table.
fn category_for_http_status(status: u16) -> ErrorCategory {
    if status == 504 {
        ErrorCategory::Timeout
    } else {
        category_for_status(status)
    }
}

/// Gemini puts its retry hint in the error body as a string like
/// `"retryDelay": "60s"`. Missing, malformed, non-string, or
/// non-positive values yield `None`.
pub(crate) fn retry_delay_secs(root: &Value) -> Option<u64> {
    let delay = root.get("retryDelay")?.as_str()?;
    let secs = delay.strip_suffix('s')?.trim().parse::<i64>().ok()?;
    if secs <= 0 {
        return None;
    }
    Some(secs as u64)
}

/// Gemini does not assign tool-call ids; generate one: 16 random bytes
/// as unpadded base64url, 22 characters. The RNG is the OS-seeded
/// thread RNG, so ids stay unique across long sessions.
pub(crate) fn generate_tool_call_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub(crate) fn parse_error_body(status: Option<u16>, root: &Value) -> Option<ApiError> {
    let error = root.get("error").filter(|e| e.is_object())?;
    let code = error.get("status").and_then(Value::as_str);

    let status_category = status.map_or(ErrorCategory::Unknown, category_for_http_status);
    let category = match code.map(category_for_status_string) {
        Some(ErrorCategory::Unknown) | None => status_category,
        Some(category) => category,
    };

    let message = error
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| match status {
            Some(status) => format!("HTTP {status} error"),
            None => "provider returned an error".to_string(),
        });

    Some(ApiError {
        category,
        http_status: status,
        message,
        provider_code: code.map(str::to_string),
        retry_after: retry_delay_secs(root),
    })
}

pub(crate) fn api_error_from_response(status: u16, body: &[u8]) -> ApiError {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|root| parse_error_body(Some(status), &root))
        .unwrap_or_else(|| ApiError {
            category: category_for_http_status(status),
            http_status: Some(status),
            message: format!("HTTP {status} error"),
            provider_code: None,
            retry_after: None,
        })
}

pub struct GoogleProvider {
    api_key: String,
    base_url: String,
    max_retries: u64,
    client: reqwest::Client,
    guard: StreamGuard,
}

impl GoogleProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: GOOGLE_BASE_URL.to_string(),
            max_retries: DEFAULT_REQUEST_MAX_RETRIES,
            client: create_client(),
            guard: StreamGuard::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u64) -> Self {
        self.max_retries = max_retries;
        self
    }
}

#[async_trait]
impl Provider for GoogleProvider {
    fn name(&self) -> &'static str {
        "google"
    }

    async fn complete(&self, request: &Request) -> Result<Response> {
        let payload = serialize_request(request)?;
        let url = build_url(&self.base_url, &request.model, &self.api_key, false);

        let response = send_with_retries(
            || self.client.post(url.as_str()).json(&payload),
            self.max_retries,
        )
        .await?;
        let status = response.status().as_u16();
        let completion = HttpCompletion::from_response(status, response.bytes().await?);
        if !completion.is_success() {
            return Err(Error::Api(api_error_from_response(status, &completion.body)));
        }
        parse_response(&completion.body)
    }

    async fn stream(&self, request: &Request) -> Result<EventStream> {
        self.guard.ensure_idle()?;

        let payload = serialize_request(request)?;
        let url = build_url(&self.base_url, &request.model, &self.api_key, true);

        let response = send_with_retries(
            || self.client.post(url.as_str()).json(&payload),
            self.max_retries,
        )
        .await?;
        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.bytes().await.unwrap_or_default();
            return Err(Error::Api(api_error_from_response(status, &body)));
        }

        Ok(spawn_stream(
            response,
            GoogleStreamMachine::new(),
            &self.guard,
        ))
    }

    fn cancel(&self) {
        self.guard.cancel_active();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn synthetic_ids_are_22_base64url_chars() {
        let id = generate_tool_call_id();
        assert_eq!(id.len(), 22);
        assert!(
            id.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );

        let other = generate_tool_call_id();
        assert_ne!(id, other);
    }

    #[test]
    fn retry_delay_parsing() {
        assert_eq!(retry_delay_secs(&json!({"retryDelay": "60s"})), Some(60));
        assert_eq!(retry_delay_secs(&json!({"retryDelay": "30s"})), Some(30));
        assert_eq!(retry_delay_secs(&json!({"retryDelay": "-10s"})), None);
        assert_eq!(retry_delay_secs(&json!({"retryDelay": "abc"})), None);
        assert_eq!(retry_delay_secs(&json!({"retryDelay": 123})), None);
        assert_eq!(retry_delay_secs(&json!({})), None);
    }

    #[test]
    fn status_string_table() {
        assert_eq!(
            category_for_status_string("PERMISSION_DENIED"),
            ErrorCategory::Auth
        );
        assert_eq!(
            category_for_status_string("RESOURCE_EXHAUSTED"),
            ErrorCategory::RateLimit
        );
        assert_eq!(
            category_for_status_string("INVALID_ARGUMENT"),
            ErrorCategory::InvalidArg
        );
        assert_eq!(
            category_for_status_string("NOT_FOUND"),
            ErrorCategory::NotFound
        );
        assert_eq!(category_for_status_string("INTERNAL"), ErrorCategory::Server);
        assert_eq!(
            category_for_status_string("UNAVAILABLE"),
            ErrorCategory::Server
        );
        assert_eq!(
            category_for_status_string("DEADLINE_EXCEEDED"),
            ErrorCategory::Timeout
        );
        assert_eq!(category_for_status_string("UNKNOWN"), ErrorCategory::Unknown);
    }

    #[test]
    fn http_504_maps_to_timeout() {
        let body = br#"{"error":{"code":504,"message":"Gateway timeout","status":"DEADLINE_EXCEEDED"}}"#;
        let api_error = api_error_from_response(504, body);
        assert_eq!(api_error.category, ErrorCategory::Timeout);

        // Even with no usable body the Gemini mapping holds.
        let api_error = api_error_from_response(504, b"");
        assert_eq!(api_error.category, ErrorCategory::Timeout);
    }

    #[test]
    fn error_body_with_retry_delay() {
        let body =
            br#"{"error":{"code":429,"status":"RESOURCE_EXHAUSTED"},"retryDelay":"60s"}"#;
        let api_error = api_error_from_response(429, body);
        assert_eq!(api_error.category, ErrorCategory::RateLimit);
        assert_eq!(api_error.retry_after, Some(60));
    }

    #[test]
    fn body_without_error_object_uses_status() {
        let api_error = api_error_from_response(500, br#"{"someOtherField":"value"}"#);
        assert_eq!(api_error.category, ErrorCategory::Server);
    }
}
