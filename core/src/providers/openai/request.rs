//! Request serialization for the OpenAI wire APIs.

use serde_json::Value;
use serde_json::json;
use trellis_protocol::ContentBlock;
use trellis_protocol::Request;
use trellis_protocol::Role;
use trellis_protocol::ThinkingLevel;
use trellis_protocol::ToolChoice;
use trellis_protocol::ToolDefinition;

use crate::error::Error;
use crate::error::Result;
use crate::model_info::ensure_thinking_supported;

use super::is_reasoning_model;

const DEFAULT_MAX_TOKENS: u32 = 4096;

fn validate(request: &Request) -> Result<()> {
    if request.model.is_empty() {
        return Err(Error::InvalidRequest("model is required".to_string()));
    }
    if request.thinking.enabled() {
        ensure_thinking_supported(&request.model)?;
    }
    Ok(())
}

fn parse_tool_parameters(tool: &ToolDefinition) -> Result<Value> {
    serde_json::from_str(&tool.parameters).map_err(|e| {
        Error::InvalidRequest(format!(
            "tool '{}' has unparseable parameters JSON: {e}",
            tool.name
        ))
    })
}

fn max_tokens(request: &Request) -> u32 {
    match request.max_output_tokens {
        Some(n) if n > 0 => n,
        _ => DEFAULT_MAX_TOKENS,
    }
}

fn effort_str(level: ThinkingLevel) -> Option<&'static str> {
    match level {
        ThinkingLevel::None => None,
        ThinkingLevel::Low => Some("low"),
        ThinkingLevel::Medium => Some("medium"),
        ThinkingLevel::High => Some("high"),
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// Serialize for `POST /v1/chat/completions`.
pub(crate) fn serialize_chat_request(request: &Request, stream: bool) -> Result<Value> {
    validate(request)?;

    let mut messages = Vec::<Value>::new();
    if let Some(system) = &request.system_prompt {
        messages.push(json!({"role": "system", "content": system}));
    }

    for message in &request.messages {
        let mut text = String::new();
        let mut tool_calls = Vec::<Value>::new();

        for block in &message.content {
            match block {
                ContentBlock::Text { text: t } => text.push_str(t),
                ContentBlock::ToolCall {
                    id,
                    name,
                    arguments,
                } => tool_calls.push(json!({
                    "id": id,
                    "type": "function",
                    "function": {"name": name, "arguments": arguments},
                })),
                ContentBlock::ToolResult {
                    tool_call_id,
                    content,
                    ..
                } => messages.push(json!({
                    "role": "tool",
                    "tool_call_id": tool_call_id,
                    "content": content,
                })),
                // OpenAI does not accept thinking content back.
                ContentBlock::Thinking { .. } | ContentBlock::RedactedThinking { .. } => {}
            }
        }

        if !tool_calls.is_empty() {
            let content = if text.is_empty() {
                Value::Null
            } else {
                Value::String(text)
            };
            messages.push(json!({
                "role": "assistant",
                "content": content,
                "tool_calls": tool_calls,
            }));
        } else if !text.is_empty() {
            messages.push(json!({"role": role_str(message.role), "content": text}));
        }
    }

    let mut body = serde_json::Map::new();
    body.insert("model".to_string(), json!(request.model));
    body.insert("messages".to_string(), Value::Array(messages));
    body.insert("max_tokens".to_string(), json!(max_tokens(request)));

    if !request.tools.is_empty() {
        let mut tools = Vec::<Value>::new();
        for tool in &request.tools {
            tools.push(json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": parse_tool_parameters(tool)?,
                    "strict": tool.strict,
                },
            }));
        }
        body.insert("tools".to_string(), Value::Array(tools));
        body.insert("tool_choice".to_string(), tool_choice_value(&request.tool_choice));
    }

    if is_reasoning_model(&request.model)
        && let Some(effort) = effort_str(request.thinking.level)
    {
        body.insert("reasoning_effort".to_string(), json!(effort));
    }

    if stream {
        body.insert("stream".to_string(), json!(true));
        body.insert(
            "stream_options".to_string(),
            json!({"include_usage": true}),
        );
    }

    Ok(Value::Object(body))
}

fn tool_choice_value(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::None => json!("none"),
        ToolChoice::Required => json!("required"),
        ToolChoice::Specific(name) => json!({
            "type": "function",
            "function": {"name": name},
        }),
    }
}

/// Serialize for `POST /v1/responses`.
pub(crate) fn serialize_responses_request(request: &Request, stream: bool) -> Result<Value> {
    validate(request)?;

    let mut input = Vec::<Value>::new();
    for message in &request.messages {
        for block in &message.content {
            match block {
                ContentBlock::Text { text } => {
                    let content_type = match message.role {
                        Role::Assistant => "output_text",
                        _ => "input_text",
                    };
                    input.push(json!({
                        "type": "message",
                        "role": role_str(message.role),
                        "content": [{"type": content_type, "text": text}],
                    }));
                }
                ContentBlock::ToolCall {
                    id,
                    name,
                    arguments,
                } => input.push(json!({
                    "type": "function_call",
                    "call_id": id,
                    "name": name,
                    "arguments": arguments,
                })),
                ContentBlock::ToolResult {
                    tool_call_id,
                    content,
                    ..
                } => input.push(json!({
                    "type": "function_call_output",
                    "call_id": tool_call_id,
                    "output": content,
                })),
                ContentBlock::Thinking { .. } | ContentBlock::RedactedThinking { .. } => {}
            }
        }
    }

    let mut body = serde_json::Map::new();
    body.insert("model".to_string(), json!(request.model));
    body.insert("input".to_string(), Value::Array(input));
    body.insert(
        "max_output_tokens".to_string(),
        json!(max_tokens(request)),
    );

    if let Some(system) = &request.system_prompt {
        body.insert("instructions".to_string(), json!(system));
    }

    if !request.tools.is_empty() {
        let mut tools = Vec::<Value>::new();
        for tool in &request.tools {
            // The Responses API uses a flattened tool shape.
            tools.push(json!({
                "type": "function",
                "name": tool.name,
                "description": tool.description,
                "parameters": parse_tool_parameters(tool)?,
                "strict": tool.strict,
            }));
        }
        body.insert("tools".to_string(), Value::Array(tools));
        body.insert(
            "tool_choice".to_string(),
            responses_tool_choice_value(&request.tool_choice),
        );
    }

    if let Some(effort) = effort_str(request.thinking.level) {
        let mut reasoning = json!({"effort": effort});
        if request.thinking.include_summary
            && let Some(obj) = reasoning.as_object_mut()
        {
            obj.insert("summary".to_string(), json!("auto"));
        }
        body.insert("reasoning".to_string(), reasoning);
    }

    if stream {
        body.insert("stream".to_string(), json!(true));
    }

    Ok(Value::Object(body))
}

fn responses_tool_choice_value(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::None => json!("none"),
        ToolChoice::Required => json!("required"),
        ToolChoice::Specific(name) => json!({"type": "function", "name": name}),
    }
}
