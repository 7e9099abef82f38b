//! Non-streaming response parsing for the Gemini API.

use serde_json::Value;
use trellis_protocol::ContentBlock;
use trellis_protocol::ErrorCategory;
use trellis_protocol::FinishReason;
use trellis_protocol::Response;
use trellis_protocol::Usage;

use crate::error::ApiError;
use crate::error::Error;
use crate::error::Result;

use super::generate_tool_call_id;
use super::map_finish_reason;
use super::parse_error_body;

pub(crate) fn parse_response(body: &[u8]) -> Result<Response> {
    let root: Value = serde_json::from_slice(body)?;
    if let Some(api_error) = parse_error_body(None, &root) {
        return Err(Error::Api(api_error));
    }

    // A blocked prompt produces no candidates at all.
    if let Some(reason) = root
        .pointer("/promptFeedback/blockReason")
        .and_then(Value::as_str)
    {
        return Err(Error::Api(ApiError {
            category: ErrorCategory::ContentFilter,
            http_status: None,
            message: format!("prompt blocked: {reason}"),
            provider_code: Some(reason.to_string()),
            retry_after: None,
        }));
    }

    let candidate = root
        .pointer("/candidates/0")
        .ok_or_else(|| Error::Parse("response has no candidates".to_string()))?;

    let mut content = Vec::new();
    if let Some(parts) = candidate
        .pointer("/content/parts")
        .and_then(Value::as_array)
    {
        for part in parts {
            if let Some(text_value) = part.get("text") {
                let text = text_value
                    .as_str()
                    .ok_or_else(|| {
                        Error::Parse("candidate part text is not a string".to_string())
                    })?
                    .to_string();
                let thought = part.get("thought").and_then(Value::as_bool).unwrap_or(false);
                if thought {
                    content.push(ContentBlock::Thinking {
                        text,
                        signature: part
                            .get("thoughtSignature")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                    });
                } else {
                    content.push(ContentBlock::Text { text });
                }
            } else if let Some(function_call) = part.get("functionCall") {
                let args = function_call.get("args").cloned().unwrap_or(Value::Null);
                content.push(ContentBlock::ToolCall {
                    id: generate_tool_call_id(),
                    name: function_call
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    arguments: if args.is_null() {
                        "{}".to_string()
                    } else {
                        serde_json::to_string(&args)?
                    },
                });
            }
        }
    }

    let finish_reason = candidate
        .get("finishReason")
        .and_then(Value::as_str)
        .map(map_finish_reason)
        .unwrap_or(FinishReason::Unknown);

    let usage = root
        .get("usageMetadata")
        .map_or_else(Usage::default, |usage| {
            let thinking = int_field(usage, "thoughtsTokenCount");
            Usage {
                input_tokens: int_field(usage, "promptTokenCount"),
                output_tokens: int_field(usage, "candidatesTokenCount") - thinking,
                thinking_tokens: thinking,
                cached_tokens: int_field(usage, "cachedContentTokenCount"),
                total_tokens: int_field(usage, "totalTokenCount"),
            }
        });

    Ok(Response {
        content,
        finish_reason,
        usage,
        model: root
            .get("modelVersion")
            .and_then(Value::as_str)
            .map(str::to_string),
        provider_data: None,
    })
}

fn int_field(value: &Value, key: &str) -> i64 {
    value.get(key).and_then(Value::as_i64).unwrap_or(0)
}
