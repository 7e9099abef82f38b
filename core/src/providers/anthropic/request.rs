//! Request serialization for the Anthropic Messages API.

use serde_json::Value;
use serde_json::json;
use trellis_protocol::ContentBlock;
use trellis_protocol::Request;
use trellis_protocol::Role;
use trellis_protocol::ThinkingLevel;
use trellis_protocol::ToolChoice;

use crate::error::Error;
use crate::error::Result;
use crate::model_info::ensure_thinking_supported;

const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Thinking budgets per level, in tokens.
fn thinking_budget(level: ThinkingLevel) -> Option<u32> {
    match level {
        ThinkingLevel::None => None,
        ThinkingLevel::Low => Some(1024),
        ThinkingLevel::Medium => Some(22016),
        ThinkingLevel::High => Some(43008),
    }
}

pub(crate) fn serialize_request(request: &Request, stream: bool) -> Result<Value> {
    if request.model.is_empty() {
        return Err(Error::InvalidRequest("model is required".to_string()));
    }
    if request.thinking.enabled() {
        ensure_thinking_supported(&request.model)?;
    }

    let mut messages = Vec::<Value>::new();
    for message in &request.messages {
        // Anthropic has no tool role; tool results ride in user messages.
        let role = match message.role {
            Role::Assistant => "assistant",
            Role::User | Role::Tool => "user",
        };

        let mut blocks = Vec::<Value>::new();
        for block in &message.content {
            blocks.push(serialize_block(block)?);
        }
        if blocks.is_empty() {
            continue;
        }
        messages.push(json!({"role": role, "content": blocks}));
    }

    let mut body = serde_json::Map::new();
    body.insert("model".to_string(), json!(request.model));
    body.insert("messages".to_string(), Value::Array(messages));
    body.insert(
        "max_tokens".to_string(),
        json!(match request.max_output_tokens {
            Some(n) if n > 0 => n,
            _ => DEFAULT_MAX_TOKENS,
        }),
    );

    if let Some(system) = &request.system_prompt {
        body.insert("system".to_string(), json!(system));
    }

    if let Some(budget) = thinking_budget(request.thinking.level) {
        body.insert(
            "thinking".to_string(),
            json!({"type": "enabled", "budget_tokens": budget}),
        );
    }

    if !request.tools.is_empty() {
        let mut tools = Vec::<Value>::new();
        for tool in &request.tools {
            let schema: Value = serde_json::from_str(&tool.parameters).map_err(|e| {
                Error::InvalidRequest(format!(
                    "tool '{}' has unparseable parameters JSON: {e}",
                    tool.name
                ))
            })?;
            tools.push(json!({
                "name": tool.name,
                "description": tool.description,
                "input_schema": schema,
            }));
        }
        body.insert("tools".to_string(), Value::Array(tools));
        body.insert(
            "tool_choice".to_string(),
            match &request.tool_choice {
                ToolChoice::Auto => json!({"type": "auto"}),
                ToolChoice::None => json!({"type": "none"}),
                ToolChoice::Required => json!({"type": "any"}),
                ToolChoice::Specific(name) => json!({"type": "tool", "name": name}),
            },
        );
    }

    if stream {
        body.insert("stream".to_string(), json!(true));
    }

    Ok(Value::Object(body))
}

fn serialize_block(block: &ContentBlock) -> Result<Value> {
    Ok(match block {
        ContentBlock::Text { text } => json!({"type": "text", "text": text}),
        ContentBlock::ToolCall {
            id,
            name,
            arguments,
        } => {
            let input: Value = serde_json::from_str(arguments).map_err(|e| {
                Error::InvalidRequest(format!(
                    "tool call '{id}' has unparseable arguments JSON: {e}"
                ))
            })?;
            json!({"type": "tool_use", "id": id, "name": name, "input": input})
        }
        ContentBlock::ToolResult {
            tool_call_id,
            content,
            is_error,
        } => json!({
            "type": "tool_result",
            "tool_use_id": tool_call_id,
            "content": content,
            "is_error": is_error,
        }),
        ContentBlock::Thinking { text, signature } => {
            let mut thinking = serde_json::Map::new();
            thinking.insert("type".to_string(), json!("thinking"));
            thinking.insert("thinking".to_string(), json!(text));
            if let Some(signature) = signature {
                thinking.insert("signature".to_string(), json!(signature));
            }
            Value::Object(thinking)
        }
        ContentBlock::RedactedThinking { data } => {
            json!({"type": "redacted_thinking", "data": data})
        }
    })
}
