//! Anthropic provider (`POST {base}/v1/messages`).
//!
//! Auth travels in the `x-api-key` header alongside a pinned
//! `anthropic-version`.

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::header::HeaderMap;
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
use crate::http::retry_after_secs;

use super::DEFAULT_REQUEST_MAX_RETRIES;
use super::EventStream;
use super::Provider;
use super::StreamGuard;
use super::send_with_retries;
use super::spawn_stream;

mod request;
mod response;
mod stream;

use request::serialize_request;
use response::parse_response;
use stream::AnthropicStreamMachine;

pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

const MESSAGES_PATH: &str = "/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub(crate) fn map_stop_reason(reason: &str) -> FinishReason {
    match reason {
        "end_turn" | "stop_sequence" => FinishReason::Stop,
        "max_tokens" => FinishReason::Length,
        "tool_use" => FinishReason::ToolUse,
        "refusal" => FinishReason::ContentFilter,
        _ => FinishReason::Unknown,
    }
}

pub(crate) fn category_for_error_type(error_type: &str) -> ErrorCategory {
    match error_type {
        "authentication_error" | "permission_error" => ErrorCategory::Auth,
        "rate_limit_error" => ErrorCategory::RateLimit,
        "invalid_request_error" => ErrorCategory::InvalidArg,
        "not_found_error" => ErrorCategory::NotFound,
        "overloaded_error" | "api_error" => ErrorCategory::Server,
        "timeout_error" => ErrorCategory::Timeout,
        _ => ErrorCategory::Unknown,
    }
}

/// Extract the structured error object from a response body, if any.
/// Bodies look like `{"type":"error","error":{"type":...,"message":...}}`;
/// the nested object wins when both levels carry a type.
pub(crate) fn parse_error_body(status: Option<u16>, root: &Value) -> Option<ApiError> {
    let error = root.get("error").filter(|e| e.is_object())?;
    let code = error.get("type").and_then(Value::as_str);

    let status_category = status.map_or(ErrorCategory::Unknown, category_for_status);
    let category = match code.map(category_for_error_type) {
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
        retry_after: None,
    })
}

pub(crate) fn api_error_from_response(
    status: u16,
    headers: &HeaderMap,
    body: &[u8],
) -> ApiError {
    let mut api_error = serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|root| parse_error_body(Some(status), &root))
        .unwrap_or_else(|| ApiError {
            category: category_for_status(status),
            http_status: Some(status),
            message: format!("HTTP {status} error"),
            provider_code: None,
            retry_after: None,
        });
    api_error.retry_after = retry_after_secs(headers);
    api_error
}

pub struct AnthropicProvider {
    api_key: String,
    base_url: String,
    max_retries: u64,
    client: reqwest::Client,
    guard: StreamGuard,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: ANTHROPIC_BASE_URL.to_string(),
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

    fn url(&self) -> String {
        format!("{}{MESSAGES_PATH}", self.base_url)
    }

    fn request_builder(&self, payload: &Value) -> reqwest::RequestBuilder {
        self.client
            .post(self.url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(payload)
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn complete(&self, request: &Request) -> Result<Response> {
        let payload = serialize_request(request, false)?;
        let response =
            send_with_retries(|| self.request_builder(&payload), self.max_retries).await?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let completion = HttpCompletion::from_response(status, response.bytes().await?);
        if !completion.is_success() {
            return Err(Error::Api(api_error_from_response(
                status,
                &headers,
                &completion.body,
            )));
        }
        parse_response(&completion.body)
    }

    async fn stream(&self, request: &Request) -> Result<EventStream> {
        self.guard.ensure_idle()?;

        let payload = serialize_request(request, true)?;
        let response = send_with_retries(
            || {
                self.request_builder(&payload)
                    .header(ACCEPT, "text/event-stream")
            },
            self.max_retries,
        )
        .await?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let headers = response.headers().clone();
            let body = response.bytes().await.unwrap_or_default();
            return Err(Error::Api(api_error_from_response(status, &headers, &body)));
        }

        Ok(spawn_stream(
            response,
            AnthropicStreamMachine::new(),
            &self.guard,
        ))
    }

    fn cancel(&self) {
        self.guard.cancel_active();
    }
}
