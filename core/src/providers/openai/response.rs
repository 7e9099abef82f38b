//! Non-streaming response parsing for the OpenAI wire APIs.

use serde_json::Value;
use trellis_protocol::ContentBlock;
use trellis_protocol::FinishReason;
use trellis_protocol::Response;
use trellis_protocol::Usage;

use crate::error::Error;
use crate::error::Result;

use super::map_finish_reason;
use super::parse_error_body;

/// Parse a Chat Completions response body.
pub(crate) fn parse_chat_response(body: &[u8]) -> Result<Response> {
    let root: Value = serde_json::from_slice(body)?;
    if let Some(api_error) = parse_error_body(None, &root) {
        return Err(Error::Api(api_error));
    }

    let message = root
        .pointer("/choices/0/message")
        .ok_or_else(|| Error::Parse("chat response has no choices".to_string()))?;

    let mut content = Vec::new();
    if let Some(text) = message.get("content").and_then(Value::as_str)
        && !text.is_empty()
    {
        content.push(ContentBlock::Text {
            text: text.to_string(),
        });
    }
    if let Some(tool_calls) = message.get("tool_calls").and_then(Value::as_array) {
        for tool_call in tool_calls {
            content.push(ContentBlock::ToolCall {
                id: string_field(tool_call, "id"),
                name: tool_call
                    .pointer("/function/name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                arguments: tool_call
                    .pointer("/function/arguments")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            });
        }
    }

    let finish_reason = root
        .pointer("/choices/0/finish_reason")
        .and_then(Value::as_str)
        .map(map_finish_reason)
        .unwrap_or(FinishReason::Unknown);

    Ok(Response {
        content,
        finish_reason,
        usage: parse_chat_usage(root.get("usage")),
        model: root.get("model").and_then(Value::as_str).map(str::to_string),
        provider_data: None,
    })
}

fn parse_chat_usage(usage: Option<&Value>) -> Usage {
    let Some(usage) = usage else {
        return Usage::default();
    };
    let thinking = usage
        .pointer("/completion_tokens_details/reasoning_tokens")
        .and_then(Value::as_i64)
        .unwrap_or(0);
    Usage {
        input_tokens: int_field(usage, "prompt_tokens"),
        output_tokens: int_field(usage, "completion_tokens"),
        thinking_tokens: thinking,
        cached_tokens: usage
            .pointer("/prompt_tokens_details/cached_tokens")
            .and_then(Value::as_i64)
            .unwrap_or(0),
        total_tokens: int_field(usage, "total_tokens"),
    }
}

/// Parse a Responses API response body.
pub(crate) fn parse_responses_response(body: &[u8]) -> Result<Response> {
    let root: Value = serde_json::from_slice(body)?;
    if let Some(api_error) = parse_error_body(None, &root) {
        return Err(Error::Api(api_error));
    }

    let output = root
        .get("output")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::Parse("responses body has no output array".to_string()))?;

    let mut content = Vec::new();
    let mut saw_tool_call = false;
    for item in output {
        match item.get("type").and_then(Value::as_str) {
            Some("message") => {
                if let Some(parts) = item.get("content").and_then(Value::as_array) {
                    for part in parts {
                        if part.get("type").and_then(Value::as_str) == Some("output_text")
                            && let Some(text) = part.get("text").and_then(Value::as_str)
                        {
                            content.push(ContentBlock::Text {
                                text: text.to_string(),
                            });
                        }
                    }
                }
            }
            Some("function_call") => {
                saw_tool_call = true;
                content.push(ContentBlock::ToolCall {
                    id: string_field(item, "call_id"),
                    name: string_field(item, "name"),
                    arguments: string_field(item, "arguments"),
                });
            }
            Some("reasoning") => {
                let mut summary = String::new();
                if let Some(parts) = item.get("summary").and_then(Value::as_array) {
                    for part in parts {
                        if let Some(text) = part.get("text").and_then(Value::as_str) {
                            summary.push_str(text);
                        }
                    }
                }
                if !summary.is_empty() {
                    content.push(ContentBlock::Thinking {
                        text: summary,
                        signature: item
                            .get("encrypted_content")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                    });
                }
            }
            _ => {}
        }
    }

    let finish_reason = if root
        .pointer("/incomplete_details/reason")
        .and_then(Value::as_str)
        == Some("max_output_tokens")
    {
        FinishReason::Length
    } else if saw_tool_call {
        FinishReason::ToolUse
    } else {
        FinishReason::Stop
    };

    let usage = root.get("usage").map_or_else(Usage::default, |usage| Usage {
        input_tokens: int_field(usage, "input_tokens"),
        output_tokens: int_field(usage, "output_tokens"),
        thinking_tokens: usage
            .pointer("/output_tokens_details/reasoning_tokens")
            .and_then(Value::as_i64)
            .unwrap_or(0),
        cached_tokens: usage
            .pointer("/input_tokens_details/cached_tokens")
            .and_then(Value::as_i64)
            .unwrap_or(0),
        total_tokens: int_field(usage, "total_tokens"),
    });

    Ok(Response {
        content,
        finish_reason,
        usage,
        model: root.get("model").and_then(Value::as_str).map(str::to_string),
        provider_data: None,
    })
}

fn string_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn int_field(value: &Value, key: &str) -> i64 {
    value.get(key).and_then(Value::as_i64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use trellis_protocol::ErrorCategory;

    #[test]
    fn parses_chat_text_response() {
        let body = br#"{
            "model": "gpt-4o",
            "choices": [{
                "message": {"role": "assistant", "content": "Hello there"},
                "finish_reason": "stop"
            }],
            "usage": {
                "prompt_tokens": 12,
                "completion_tokens": 3,
                "total_tokens": 15,
                "prompt_tokens_details": {"cached_tokens": 4}
            }
        }"#;
        let response = parse_chat_response(body).expect("parse");
        assert_eq!(
            response.content,
            vec![ContentBlock::Text {
                text: "Hello there".to_string()
            }]
        );
        assert_eq!(response.finish_reason, FinishReason::Stop);
        assert_eq!(response.model.as_deref(), Some("gpt-4o"));
        assert_eq!(response.usage.input_tokens, 12);
        assert_eq!(response.usage.cached_tokens, 4);
    }

    #[test]
    fn parses_chat_tool_calls() {
        let body = br#"{
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "get_weather", "arguments": "{\"city\":\"Boston\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }"#;
        let response = parse_chat_response(body).expect("parse");
        assert_eq!(response.finish_reason, FinishReason::ToolUse);
        assert_eq!(
            response.content,
            vec![ContentBlock::ToolCall {
                id: "call_1".to_string(),
                name: "get_weather".to_string(),
                arguments: r#"{"city":"Boston"}"#.to_string(),
            }]
        );
    }

    #[test]
    fn top_level_error_short_circuits() {
        let body = br#"{"error":{"type":"invalid_request_error","message":"bad model"}}"#;
        let err = parse_chat_response(body).expect_err("must fail");
        assert_eq!(err.category(), ErrorCategory::InvalidArg);
        assert!(err.to_string().contains("bad model"));
    }

    #[test]
    fn missing_choices_is_a_parse_error() {
        let err = parse_chat_response(br#"{"object":"list"}"#).expect_err("must fail");
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn parses_responses_output() {
        let body = br#"{
            "model": "o3-mini",
            "status": "completed",
            "output": [
                {"type": "reasoning", "summary": [{"type": "summary_text", "text": "think"}]},
                {"type": "message", "role": "assistant",
                 "content": [{"type": "output_text", "text": "Answer"}]},
                {"type": "function_call", "call_id": "call_2", "name": "lookup", "arguments": "{}"}
            ],
            "usage": {
                "input_tokens": 5,
                "output_tokens": 9,
                "total_tokens": 14,
                "output_tokens_details": {"reasoning_tokens": 6}
            }
        }"#;
        let response = parse_responses_response(body).expect("parse");
        assert_eq!(response.finish_reason, FinishReason::ToolUse);
        assert_eq!(response.content.len(), 3);
        assert_eq!(
            response.content[0],
            ContentBlock::Thinking {
                text: "think".to_string(),
                signature: None
            }
        );
        assert_eq!(response.usage.thinking_tokens, 6);
        assert_eq!(response.model.as_deref(), Some("o3-mini"));
    }
}
