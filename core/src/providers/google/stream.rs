//! Streaming state machine for the Gemini API.
//!
//! Gemini streams whole JSON objects, one per SSE data line, with no
//! explicit terminator: the chunk carrying `usageMetadata` closes the
//! stream. Gemini does not assign tool-call ids, so the machine
//! generates a synthetic 22-character base64url id per call.

use serde_json::Value;
use tracing::debug;
use trellis_protocol::ErrorCategory;
use trellis_protocol::FinishReason;
use trellis_protocol::StreamEvent;
use trellis_protocol::Usage;

use crate::http::StreamMachine;
use crate::sse::SseEvent;

use super::category_for_status_string;
use super::generate_tool_call_id;
use super::map_finish_reason;

#[derive(Debug, Default)]
pub(crate) struct GoogleStreamMachine {
    model: Option<String>,
    started: bool,
    finished: bool,
    finish_reason: FinishReason,
    open_tool: Option<u32>,
    next_tool_index: u32,
}

impl GoogleStreamMachine {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn process_chunk(&mut self, data: &str, out: &mut Vec<StreamEvent>) {
        if self.finished {
            return;
        }

        // Malformed payloads never terminate the stream.
        let chunk: Value = match serde_json::from_str(data) {
            Ok(value) => value,
            Err(e) => {
                debug!("dropping unparseable gemini chunk: {e}");
                return;
            }
        };

        if let Some(error) = chunk.get("error").filter(|e| e.is_object()) {
            let category = error
                .get("status")
                .and_then(Value::as_str)
                .map(category_for_status_string)
                .unwrap_or(ErrorCategory::Unknown);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("provider returned an error")
                .to_string();
            out.push(StreamEvent::Error { category, message });
            self.finished = true;
            return;
        }

        if self.model.is_none()
            && let Some(model) = chunk.get("modelVersion").and_then(Value::as_str)
        {
            self.model = Some(model.to_string());
            self.ensure_started(out);
        }

        if let Some(reason) = chunk
            .pointer("/promptFeedback/blockReason")
            .and_then(Value::as_str)
        {
            out.push(StreamEvent::Error {
                category: ErrorCategory::ContentFilter,
                message: format!("prompt blocked: {reason}"),
            });
            self.finished = true;
            return;
        }

        if let Some(parts) = chunk
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array)
        {
            for part in parts {
                if self.finished {
                    return;
                }
                self.process_part(part, out);
            }
        }

        if let Some(reason) = chunk
            .pointer("/candidates/0/finishReason")
            .and_then(Value::as_str)
        {
            self.finish_reason = map_finish_reason(reason);
        }

        if let Some(usage) = chunk.get("usageMetadata").filter(|u| u.is_object()) {
            if let Some(index) = self.open_tool.take() {
                out.push(StreamEvent::ToolCallDone { index });
            }
            let thinking = int_field(usage, "thoughtsTokenCount");
            let usage = Usage {
                input_tokens: int_field(usage, "promptTokenCount"),
                // Thinking tokens are excluded so the normalized count is
                // user-visible output. The subtraction is preserved even
                // when the provider's fields are inconsistent.
                output_tokens: int_field(usage, "candidatesTokenCount") - thinking,
                thinking_tokens: thinking,
                cached_tokens: int_field(usage, "cachedContentTokenCount"),
                total_tokens: int_field(usage, "totalTokenCount"),
            };
            out.push(StreamEvent::Done {
                finish_reason: self.finish_reason,
                usage,
                provider_data: None,
            });
            self.finished = true;
        }
    }

    fn process_part(&mut self, part: &Value, out: &mut Vec<StreamEvent>) {
        if let Some(text_value) = part.get("text") {
            let Some(text) = text_value.as_str() else {
                out.push(StreamEvent::Error {
                    category: ErrorCategory::Unknown,
                    message: "candidate part text is not a string".to_string(),
                });
                self.finished = true;
                return;
            };
            if let Some(index) = self.open_tool.take() {
                out.push(StreamEvent::ToolCallDone { index });
            }
            self.ensure_started(out);
            let thought = part.get("thought").and_then(Value::as_bool).unwrap_or(false);
            if thought {
                out.push(StreamEvent::ThinkingDelta {
                    index: 0,
                    text: text.to_string(),
                });
            } else {
                out.push(StreamEvent::TextDelta {
                    index: 0,
                    text: text.to_string(),
                });
            }
            return;
        }

        if let Some(function_call) = part.get("functionCall") {
            if let Some(index) = self.open_tool.take() {
                out.push(StreamEvent::ToolCallDone { index });
            }
            self.ensure_started(out);

            let index = self.next_tool_index;
            self.next_tool_index += 1;

            let name = function_call
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string);
            let arguments = function_call
                .get("args")
                .map(|args| serde_json::to_string(args).unwrap_or_else(|_| "{}".to_string()))
                .unwrap_or_else(|| "{}".to_string());

            out.push(StreamEvent::ToolCallStart {
                index,
                id: Some(generate_tool_call_id()),
                name,
            });
            out.push(StreamEvent::ToolCallDelta { index, arguments });
            self.open_tool = Some(index);
        }
        // A part with neither text nor functionCall is tolerated.
    }

    fn ensure_started(&mut self, out: &mut Vec<StreamEvent>) {
        if !self.started {
            out.push(StreamEvent::Start {
                model: self.model.clone(),
            });
            self.started = true;
        }
    }
}

fn int_field(value: &Value, key: &str) -> i64 {
    value.get(key).and_then(Value::as_i64).unwrap_or(0)
}

impl StreamMachine for GoogleStreamMachine {
    fn on_event(&mut self, event: &SseEvent, out: &mut Vec<StreamEvent>) {
        let Some(data) = event.data.as_deref() else {
            return;
        };
        self.process_chunk(data, out);
    }

    fn finished(&self) -> bool {
        self.finished
    }
}
