//! Non-streaming response parsing for the Anthropic Messages API.

use serde_json::Value;
use trellis_protocol::ContentBlock;
use trellis_protocol::FinishReason;
use trellis_protocol::Response;
use trellis_protocol::Usage;

use crate::error::Error;
use crate::error::Result;

use super::map_stop_reason;
use super::parse_error_body;

pub(crate) fn parse_response(body: &[u8]) -> Result<Response> {
    let root: Value = serde_json::from_slice(body)?;
    if let Some(api_error) = parse_error_body(None, &root) {
        return Err(Error::Api(api_error));
    }

    let content_array = root
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::Parse("message has no content array".to_string()))?;

    let mut content = Vec::new();
    for block in content_array {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    content.push(ContentBlock::Text {
                        text: text.to_string(),
                    });
                }
            }
            Some("tool_use") => {
                let input = block.get("input").cloned().unwrap_or(Value::Null);
                content.push(ContentBlock::ToolCall {
                    id: block
                        .get("id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    name: block
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    arguments: serde_json::to_string(&input)?,
                });
            }
            Some("thinking") => {
                content.push(ContentBlock::Thinking {
                    text: block
                        .get("thinking")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    signature: block
                        .get("signature")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                });
            }
            Some("redacted_thinking") => {
                if let Some(data) = block.get("data").and_then(Value::as_str) {
                    content.push(ContentBlock::RedactedThinking {
                        data: data.to_string(),
                    });
                }
            }
            _ => {}
        }
    }

    let finish_reason = root
        .get("stop_reason")
        .and_then(Value::as_str)
        .map(map_stop_reason)
        .unwrap_or(FinishReason::Unknown);

    let usage = root.get("usage").map_or_else(Usage::default, |usage| {
        let input = usage.get("input_tokens").and_then(Value::as_i64).unwrap_or(0);
        let output = usage
            .get("output_tokens")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        Usage {
            input_tokens: input,
            output_tokens: output,
            thinking_tokens: 0,
            cached_tokens: usage
                .get("cache_read_input_tokens")
                .and_then(Value::as_i64)
                .unwrap_or(0),
            total_tokens: input + output,
        }
    });

    Ok(Response {
        content,
        finish_reason,
        usage,
        model: root.get("model").and_then(Value::as_str).map(str::to_string),
        provider_data: None,
    })
}
