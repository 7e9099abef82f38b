//! Streaming state machines for the two OpenAI wire APIs.
//!
//! [`ChatStreamMachine`] consumes Chat Completions delta chunks: every
//! SSE data payload is either the literal `[DONE]` or a JSON object with
//! a `choices` array. Finish reason and usage are held back until the
//! `[DONE]` sentinel materializes the terminal event.
//!
//! [`ResponsesStreamMachine`] consumes the typed `response.*` events of
//! the Responses API used by reasoning models.

use serde_json::Value;
use tracing::debug;
use trellis_protocol::ErrorCategory;
use trellis_protocol::FinishReason;
use trellis_protocol::StreamEvent;
use trellis_protocol::Usage;

use crate::http::StreamMachine;
use crate::sse::SseEvent;

use super::category_for_error_type;
use super::map_finish_reason;

#[derive(Debug, Default)]
pub(crate) struct ChatStreamMachine {
    model: Option<String>,
    started: bool,
    finished: bool,
    finish_reason: FinishReason,
    usage: Usage,
    open_tool: Option<u32>,
}

impl ChatStreamMachine {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Process one SSE data payload.
    pub(crate) fn process_data(&mut self, data: &str, out: &mut Vec<StreamEvent>) {
        if self.finished {
            return;
        }

        if data.trim() == "[DONE]" {
            if let Some(index) = self.open_tool.take() {
                out.push(StreamEvent::ToolCallDone { index });
            }
            out.push(StreamEvent::Done {
                finish_reason: self.finish_reason,
                usage: self.usage,
                provider_data: None,
            });
            self.finished = true;
            return;
        }

        // Garbage keep-alives are tolerated.
        let chunk: Value = match serde_json::from_str(data) {
            Ok(value) => value,
            Err(e) => {
                debug!("dropping unparseable chat chunk: {e}");
                return;
            }
        };

        if let Some(error) = chunk.get("error") {
            let category = error
                .get("type")
                .and_then(Value::as_str)
                .map(category_for_error_type)
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
            && let Some(model) = chunk.get("model").and_then(Value::as_str)
        {
            self.model = Some(model.to_string());
        }

        if let Some(usage) = chunk.get("usage").filter(|u| u.is_object()) {
            self.update_usage(usage);
        }

        let Some(choice) = chunk.get("choices").and_then(|c| c.get(0)) else {
            return;
        };

        if let Some(delta) = choice.get("delta") {
            if let Some(content) = delta.get("content").and_then(Value::as_str)
                && !content.is_empty()
            {
                self.ensure_started(out);
                out.push(StreamEvent::TextDelta {
                    index: 0,
                    text: content.to_string(),
                });
            }

            if let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) {
                for tool_call in tool_calls {
                    self.process_tool_call_delta(tool_call, out);
                }
            }
        }

        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            self.finish_reason = map_finish_reason(reason);
        }
    }

    fn process_tool_call_delta(&mut self, tool_call: &Value, out: &mut Vec<StreamEvent>) {
        let index = tool_call
            .get("index")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32;

        if self.open_tool != Some(index) {
            if let Some(open) = self.open_tool.take() {
                out.push(StreamEvent::ToolCallDone { index: open });
            }
            self.ensure_started(out);
            let id = tool_call
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string);
            let name = tool_call
                .pointer("/function/name")
                .and_then(Value::as_str)
                .map(str::to_string);
            out.push(StreamEvent::ToolCallStart { index, id, name });
            self.open_tool = Some(index);
        }

        // Arguments present but not a string are ignored.
        if let Some(arguments) = tool_call.pointer("/function/arguments")
            && let Some(arguments) = arguments.as_str()
        {
            out.push(StreamEvent::ToolCallDelta {
                index,
                arguments: arguments.to_string(),
            });
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

    fn update_usage(&mut self, usage: &Value) {
        if let Some(n) = usage.get("prompt_tokens").and_then(Value::as_i64) {
            self.usage.input_tokens = n;
        }
        if let Some(n) = usage.get("completion_tokens").and_then(Value::as_i64) {
            self.usage.output_tokens = n;
        }
        if let Some(n) = usage.get("total_tokens").and_then(Value::as_i64) {
            self.usage.total_tokens = n;
        }
        if let Some(n) = usage
            .pointer("/completion_tokens_details/reasoning_tokens")
            .and_then(Value::as_i64)
        {
            self.usage.thinking_tokens = n;
        }
        if let Some(n) = usage
            .pointer("/prompt_tokens_details/cached_tokens")
            .and_then(Value::as_i64)
        {
            self.usage.cached_tokens = n;
        }
    }

    #[cfg(test)]
    pub(crate) fn finish_reason(&self) -> FinishReason {
        self.finish_reason
    }
}

impl StreamMachine for ChatStreamMachine {
    fn on_event(&mut self, event: &SseEvent, out: &mut Vec<StreamEvent>) {
        let Some(data) = event.data.as_deref() else {
            return;
        };
        self.process_data(data, out);
    }

    fn finished(&self) -> bool {
        self.finished
    }
}

/// State machine for the typed `response.*` event stream of the
/// Responses API.
#[derive(Debug, Default)]
pub(crate) struct ResponsesStreamMachine {
    model: Option<String>,
    started: bool,
    finished: bool,
    saw_tool_call: bool,
    open_tool: Option<u32>,
    usage: Usage,
}

impl ResponsesStreamMachine {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn process_data(&mut self, data: &str, out: &mut Vec<StreamEvent>) {
        if self.finished {
            return;
        }

        let payload: Value = match serde_json::from_str(data) {
            Ok(value) => value,
            Err(e) => {
                debug!("dropping unparseable responses event: {e}");
                return;
            }
        };

        let Some(kind) = payload.get("type").and_then(Value::as_str) else {
            return;
        };

        match kind {
            "response.created" => {
                if self.model.is_none()
                    && let Some(model) = payload.pointer("/response/model").and_then(Value::as_str)
                {
                    self.model = Some(model.to_string());
                }
                self.ensure_started(out);
            }
            "response.output_text.delta" => {
                if let Some(delta) = payload.get("delta").and_then(Value::as_str) {
                    self.ensure_started(out);
                    out.push(StreamEvent::TextDelta {
                        index: output_index(&payload),
                        text: delta.to_string(),
                    });
                }
            }
            "response.reasoning_summary_text.delta" | "response.reasoning_text.delta" => {
                if let Some(delta) = payload.get("delta").and_then(Value::as_str) {
                    self.ensure_started(out);
                    out.push(StreamEvent::ThinkingDelta {
                        index: output_index(&payload),
                        text: delta.to_string(),
                    });
                }
            }
            "response.output_item.added" => {
                if payload.pointer("/item/type").and_then(Value::as_str) == Some("function_call") {
                    let index = output_index(&payload);
                    if let Some(open) = self.open_tool.take() {
                        out.push(StreamEvent::ToolCallDone { index: open });
                    }
                    self.ensure_started(out);
                    let id = payload
                        .pointer("/item/call_id")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    let name = payload
                        .pointer("/item/name")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    out.push(StreamEvent::ToolCallStart { index, id, name });
                    self.open_tool = Some(index);
                    self.saw_tool_call = true;
                }
            }
            "response.function_call_arguments.delta" => {
                if let Some(index) = self.open_tool
                    && let Some(delta) = payload.get("delta").and_then(Value::as_str)
                {
                    out.push(StreamEvent::ToolCallDelta {
                        index,
                        arguments: delta.to_string(),
                    });
                }
            }
            "response.output_item.done" => {
                if payload.pointer("/item/type").and_then(Value::as_str) == Some("function_call")
                    && let Some(index) = self.open_tool.take()
                {
                    out.push(StreamEvent::ToolCallDone { index });
                }
            }
            "response.completed" => {
                if let Some(usage) = payload.pointer("/response/usage") {
                    self.update_usage(usage);
                }
                let incomplete = payload
                    .pointer("/response/incomplete_details/reason")
                    .and_then(Value::as_str);
                let finish_reason = if incomplete == Some("max_output_tokens") {
                    FinishReason::Length
                } else if self.saw_tool_call {
                    FinishReason::ToolUse
                } else {
                    FinishReason::Stop
                };
                if let Some(index) = self.open_tool.take() {
                    out.push(StreamEvent::ToolCallDone { index });
                }
                out.push(StreamEvent::Done {
                    finish_reason,
                    usage: self.usage,
                    provider_data: None,
                });
                self.finished = true;
            }
            "response.failed" | "error" => {
                let error = payload
                    .pointer("/response/error")
                    .or_else(|| payload.get("error"))
                    .unwrap_or(&payload);
                let category = error
                    .get("code")
                    .and_then(Value::as_str)
                    .map(category_for_error_type)
                    .unwrap_or(ErrorCategory::Unknown);
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("response failed")
                    .to_string();
                out.push(StreamEvent::Error { category, message });
                self.finished = true;
            }
            _ => {}
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

    fn update_usage(&mut self, usage: &Value) {
        if let Some(n) = usage.get("input_tokens").and_then(Value::as_i64) {
            self.usage.input_tokens = n;
        }
        if let Some(n) = usage.get("output_tokens").and_then(Value::as_i64) {
            self.usage.output_tokens = n;
        }
        if let Some(n) = usage.get("total_tokens").and_then(Value::as_i64) {
            self.usage.total_tokens = n;
        }
        if let Some(n) = usage
            .pointer("/output_tokens_details/reasoning_tokens")
            .and_then(Value::as_i64)
        {
            self.usage.thinking_tokens = n;
        }
        if let Some(n) = usage
            .pointer("/input_tokens_details/cached_tokens")
            .and_then(Value::as_i64)
        {
            self.usage.cached_tokens = n;
        }
    }
}

fn output_index(payload: &Value) -> u32 {
    payload
        .get("output_index")
        .and_then(Value::as_u64)
        .unwrap_or(0) as u32
}

impl StreamMachine for ResponsesStreamMachine {
    fn on_event(&mut self, event: &SseEvent, out: &mut Vec<StreamEvent>) {
        let Some(data) = event.data.as_deref() else {
            return;
        };
        self.process_data(data, out);
    }

    fn finished(&self) -> bool {
        self.finished
    }
}
