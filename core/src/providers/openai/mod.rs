//! OpenAI provider.
//!
//! Speaks both wire APIs: classic Chat Completions and the Responses
//! API. Reasoning models (`o1-*`, `o3-*`, `o3`, `gpt-5*`) are routed to
//! the Responses API; the `use_responses_api` option forces it for
//! everything else.

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

use request::serialize_chat_request;
use request::serialize_responses_request;
use response::parse_chat_response;
use response::parse_responses_response;
use stream::ChatStreamMachine;
use stream::ResponsesStreamMachine;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com";

const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";
const RESPONSES_PATH: &str = "/v1/responses";

/// True for models served by the Responses API.
pub(crate) fn is_reasoning_model(model: &str) -> bool {
    model.starts_with("o1-")
        || model.starts_with("o3-")
        || model == "o3"
        || model.starts_with("gpt-5")
}

pub(crate) fn map_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "stop" | "stop_sequence" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "tool_calls" | "tool_use" => FinishReason::ToolUse,
        "content_filter" | "refusal" => FinishReason::ContentFilter,
        _ => FinishReason::Unknown,
    }
}

pub(crate) fn category_for_error_type(error_type: &str) -> ErrorCategory {
    match error_type {
        "authentication_error" | "permission_error" => ErrorCategory::Auth,
        "rate_limit_error" | "rate_limit_exceeded" => ErrorCategory::RateLimit,
        "invalid_request_error" => ErrorCategory::InvalidArg,
        "not_found_error" => ErrorCategory::NotFound,
        "server_error" | "service_unavailable" | "internal_server_error" => ErrorCategory::Server,
        _ => ErrorCategory::Unknown,
    }
}

/// Extract a structured error from a response body, if one is present.
/// The nested `error` object is preferred when both a top-level and
/// nested one exist. A recognized body-level type string overrides the
/// status-derived category; an unrecognized one falls back to it.
pub(crate) fn parse_error_body(status: Option<u16>, root: &Value) -> Option<ApiError> {
    let error = root.get("error").filter(|e| e.is_object())?;
    let code = error
        .get("type")
        .and_then(Value::as_str)
        .or_else(|| error.get("code").and_then(Value::as_str));

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

/// Build the categorized error for a non-2xx HTTP response.
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

pub struct OpenAiProvider {
    api_key: String,
    base_url: String,
    use_responses_api: bool,
    max_retries: u64,
    client: reqwest::Client,
    guard: StreamGuard,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_options(api_key, false)
    }

    /// The Responses API performs better with reasoning models; this
    /// forces it for every model.
    pub fn with_options(api_key: impl Into<String>, use_responses_api: bool) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: OPENAI_BASE_URL.to_string(),
            use_responses_api,
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

    fn wants_responses_api(&self, model: &str) -> bool {
        self.use_responses_api || is_reasoning_model(model)
    }

    fn url(&self, responses_api: bool) -> String {
        let path = if responses_api {
            RESPONSES_PATH
        } else {
            CHAT_COMPLETIONS_PATH
        };
        format!("{}{path}", self.base_url)
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete(&self, request: &Request) -> Result<Response> {
        let responses_api = self.wants_responses_api(&request.model);
        let payload = if responses_api {
            serialize_responses_request(request, false)?
        } else {
            serialize_chat_request(request, false)?
        };

        let response = send_with_retries(
            || {
                self.client
                    .post(self.url(responses_api))
                    .bearer_auth(&self.api_key)
                    .json(&payload)
            },
            self.max_retries,
        )
        .await?;

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

        if responses_api {
            parse_responses_response(&completion.body)
        } else {
            parse_chat_response(&completion.body)
        }
    }

    async fn stream(&self, request: &Request) -> Result<EventStream> {
        self.guard.ensure_idle()?;

        let responses_api = self.wants_responses_api(&request.model);
        let payload = if responses_api {
            serialize_responses_request(request, true)?
        } else {
            serialize_chat_request(request, true)?
        };

        let response = send_with_retries(
            || {
                self.client
                    .post(self.url(responses_api))
                    .bearer_auth(&self.api_key)
                    .header(ACCEPT, "text/event-stream")
                    .json(&payload)
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

        if responses_api {
            Ok(spawn_stream(
                response,
                ResponsesStreamMachine::new(),
                &self.guard,
            ))
        } else {
            Ok(spawn_stream(response, ChatStreamMachine::new(), &self.guard))
        }
    }

    fn cancel(&self) {
        self.guard.cancel_active();
    }
}
