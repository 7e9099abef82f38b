//! Streaming state machine for the Anthropic Messages API.
//!
//! Anthropic streams named SSE events with JSON payloads. Content
//! arrives in indexed blocks bracketed by `content_block_start` /
//! `content_block_stop`; the finish reason and final usage arrive in
//! `message_delta`, and `message_stop` materializes the terminal event.
//!
//! Unlike the other providers, a malformed payload here is a protocol
//! error: the machine emits an error event and goes terminal.

use serde_json::Value;
use trellis_protocol::ErrorCategory;
use trellis_protocol::FinishReason;
use trellis_protocol::StreamEvent;
use trellis_protocol::Usage;

use crate::http::StreamMachine;
use crate::sse::SseEvent;

use super::category_for_error_type;
use super::map_stop_reason;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Text,
    ToolUse,
    Thinking,
    RedactedThinking,
    Other,
}

#[derive(Debug, Default)]
pub(crate) struct AnthropicStreamMachine {
    model: Option<String>,
    started: bool,
    finished: bool,
    finish_reason: FinishReason,
    usage: Usage,
    current_block: Option<(u32, BlockKind)>,
    thinking_signature: String,
    redacted_data: String,
}

impl AnthropicStreamMachine {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn process_event(
        &mut self,
        event_type: &str,
        data: &str,
        out: &mut Vec<StreamEvent>,
    ) {
        if self.finished {
            return;
        }

        let payload: Value = match serde_json::from_str(data) {
            Ok(value) => value,
            Err(_) => {
                out.push(StreamEvent::Error {
                    category: ErrorCategory::Unknown,
                    message: "Invalid JSON in SSE event".to_string(),
                });
                self.finished = true;
                return;
            }
        };
        if !payload.is_object() {
            out.push(StreamEvent::Error {
                category: ErrorCategory::Unknown,
                message: "SSE event data is not a JSON object".to_string(),
            });
            self.finished = true;
            return;
        }

        match event_type {
            "message_start" => self.on_message_start(&payload, out),
            "content_block_start" => self.on_block_start(&payload, out),
            "content_block_delta" => self.on_block_delta(&payload, out),
            "content_block_stop" => self.on_block_stop(out),
            "message_delta" => self.on_message_delta(&payload),
            "message_stop" => {
                if self.usage.total_tokens == 0 {
                    self.usage.total_tokens = self.usage.input_tokens + self.usage.output_tokens;
                }
                out.push(StreamEvent::Done {
                    finish_reason: self.finish_reason,
                    usage: self.usage,
                    provider_data: None,
                });
                self.finished = true;
            }
            "error" => {
                let error = payload.get("error");
                let category = error
                    .and_then(|e| e.get("type"))
                    .and_then(Value::as_str)
                    .map(category_for_error_type)
                    .unwrap_or(ErrorCategory::Unknown);
                let message = error
                    .and_then(|e| e.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("provider returned an error")
                    .to_string();
                out.push(StreamEvent::Error { category, message });
                self.finished = true;
            }
            // ping is a keep-alive; unknown event types are forward
            // compatibility and are ignored.
            _ => {}
        }
    }

    fn on_message_start(&mut self, payload: &Value, out: &mut Vec<StreamEvent>) {
        if let Some(model) = payload
            .pointer("/message/model")
            .and_then(Value::as_str)
        {
            self.model = Some(model.to_string());
        }
        if let Some(usage) = payload.pointer("/message/usage") {
            self.update_usage(usage);
        }
        self.ensure_started(out);
    }

    fn on_block_start(&mut self, payload: &Value, out: &mut Vec<StreamEvent>) {
        let index = block_index(payload);
        let block = payload.get("content_block");
        let kind = match block
            .and_then(|b| b.get("type"))
            .and_then(Value::as_str)
        {
            Some("text") => BlockKind::Text,
            Some("tool_use") => BlockKind::ToolUse,
            Some("thinking") => BlockKind::Thinking,
            Some("redacted_thinking") => BlockKind::RedactedThinking,
            _ => BlockKind::Other,
        };

        // A new block while a tool_use block is still open closes it.
        if let Some((open_index, BlockKind::ToolUse)) = self.current_block.take() {
            out.push(StreamEvent::ToolCallDone { index: open_index });
        }

        self.ensure_started(out);
        if kind == BlockKind::ToolUse {
            out.push(StreamEvent::ToolCallStart {
                index,
                id: block
                    .and_then(|b| b.get("id"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                name: block
                    .and_then(|b| b.get("name"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        }
        if kind == BlockKind::RedactedThinking
            && let Some(data) = block
                .and_then(|b| b.get("data"))
                .and_then(Value::as_str)
        {
            self.redacted_data.push_str(data);
        }
        self.current_block = Some((index, kind));
    }

    fn on_block_delta(&mut self, payload: &Value, out: &mut Vec<StreamEvent>) {
        let index = block_index(payload);
        let Some(delta) = payload.get("delta") else {
            return;
        };
        match delta.get("type").and_then(Value::as_str) {
            Some("text_delta") => {
                if let Some(text) = delta.get("text").and_then(Value::as_str) {
                    self.ensure_started(out);
                    out.push(StreamEvent::TextDelta {
                        index,
                        text: text.to_string(),
                    });
                }
            }
            Some("thinking_delta") => {
                if let Some(text) = delta.get("thinking").and_then(Value::as_str) {
                    self.ensure_started(out);
                    out.push(StreamEvent::ThinkingDelta {
                        index,
                        text: text.to_string(),
                    });
                }
            }
            Some("signature_delta") => {
                // Accumulated for round-tripping; no event.
                if let Some(signature) = delta.get("signature").and_then(Value::as_str) {
                    self.thinking_signature.push_str(signature);
                }
            }
            Some("input_json_delta") => {
                if matches!(self.current_block, Some((_, BlockKind::ToolUse)))
                    && let Some(partial) = delta.get("partial_json").and_then(Value::as_str)
                {
                    out.push(StreamEvent::ToolCallDelta {
                        index,
                        arguments: partial.to_string(),
                    });
                }
            }
            _ => {}
        }
    }

    fn on_block_stop(&mut self, out: &mut Vec<StreamEvent>) {
        if let Some((index, kind)) = self.current_block.take()
            && kind == BlockKind::ToolUse
        {
            out.push(StreamEvent::ToolCallDone { index });
        }
    }

    fn on_message_delta(&mut self, payload: &Value) {
        if let Some(reason) = payload
            .pointer("/delta/stop_reason")
            .and_then(Value::as_str)
        {
            self.finish_reason = map_stop_reason(reason);
        }
        if let Some(usage) = payload.get("usage") {
            self.update_usage(usage);
        }
    }

    fn update_usage(&mut self, usage: &Value) {
        if let Some(n) = usage.get("input_tokens").and_then(Value::as_i64) {
            self.usage.input_tokens = n;
        }
        if let Some(n) = usage.get("output_tokens").and_then(Value::as_i64) {
            self.usage.output_tokens = n;
        }
        if let Some(n) = usage
            .get("cache_read_input_tokens")
            .and_then(Value::as_i64)
        {
            self.usage.cached_tokens = n;
        }
    }

    fn ensure_started(&mut self, out: &mut Vec<StreamEvent>) {
        if !self.started {
            out.push(StreamEvent::Start {
                model: self.model.clone(),
            });
            self.started = true;
        }
    }

    #[cfg(test)]
    pub(crate) fn thinking_signature(&self) -> &str {
        &self.thinking_signature
    }

    #[cfg(test)]
    pub(crate) fn redacted_data(&self) -> &str {
        &self.redacted_data
    }
}

fn block_index(payload: &Value) -> u32 {
    payload.get("index").and_then(Value::as_u64).unwrap_or(0) as u32
}

impl StreamMachine for AnthropicStreamMachine {
    fn on_event(&mut self, event: &SseEvent, out: &mut Vec<StreamEvent>) {
        // The event name comes from the SSE `event:` field; payloads
        // also carry a redundant `type` member we fall back to.
        let Some(data) = event.data.as_deref() else {
            return;
        };
        let event_type = match event.event.as_deref() {
            Some(name) => name.to_string(),
            None => serde_json::from_str::<Value>(data)
                .ok()
                .and_then(|v| {
                    v.get("type")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or_default(),
        };
        self.process_event(&event_type, data, out);
    }

    fn finished(&self) -> bool {
        self.finished
    }
}
