//! Request serialization for the Gemini API.

use serde_json::Value;
use serde_json::json;
use std::collections::HashMap;
use trellis_protocol::ContentBlock;
use trellis_protocol::Request;
use trellis_protocol::Role;
use trellis_protocol::ThinkingLevel;
use trellis_protocol::ToolChoice;

use crate::error::Error;
use crate::error::Result;
use crate::model_info::ensure_thinking_supported;

/// Thinking budgets per level, in tokens.
fn thinking_budget(level: ThinkingLevel) -> Option<u32> {
    match level {
        ThinkingLevel::None => None,
        ThinkingLevel::Low => Some(128),
        ThinkingLevel::Medium => Some(11008),
        ThinkingLevel::High => Some(21888),
    }
}

pub(crate) fn build_url(base_url: &str, model: &str, api_key: &str, stream: bool) -> String {
    if stream {
        format!("{base_url}/v1beta/models/{model}:streamGenerateContent?alt=sse&key={api_key}")
    } else {
        format!("{base_url}/v1beta/models/{model}:generateContent?key={api_key}")
    }
}

pub(crate) fn serialize_request(request: &Request) -> Result<Value> {
    if request.model.is_empty() {
        return Err(Error::InvalidRequest("model is required".to_string()));
    }
    if request.thinking.enabled() {
        ensure_thinking_supported(&request.model)?;
    }

    // Gemini correlates tool results by function name, not id; recover
    // the name from the originating call.
    let mut call_names = HashMap::<&str, &str>::new();
    for message in &request.messages {
        for block in &message.content {
            if let ContentBlock::ToolCall { id, name, .. } = block {
                call_names.insert(id.as_str(), name.as_str());
            }
        }
    }

    let mut contents = Vec::<Value>::new();
    for message in &request.messages {
        let role = match message.role {
            Role::Assistant => "model",
            Role::User | Role::Tool => "user",
        };

        let mut parts = Vec::<Value>::new();
        for block in &message.content {
            match block {
                ContentBlock::Text { text } => parts.push(json!({"text": text})),
                ContentBlock::ToolCall {
                    id,
                    name,
                    arguments,
                } => {
                    let args: Value = serde_json::from_str(arguments).map_err(|e| {
                        Error::InvalidRequest(format!(
                            "tool call '{id}' has unparseable arguments JSON: {e}"
                        ))
                    })?;
                    parts.push(json!({"functionCall": {"name": name, "args": args}}));
                }
                ContentBlock::ToolResult {
                    tool_call_id,
                    content,
                    ..
                } => {
                    let name = call_names
                        .get(tool_call_id.as_str())
                        .copied()
                        .unwrap_or(tool_call_id.as_str());
                    parts.push(json!({
                        "functionResponse": {
                            "name": name,
                            "response": {"content": content},
                        },
                    }));
                }
                ContentBlock::Thinking { text, signature } => {
                    let mut part = serde_json::Map::new();
                    part.insert("text".to_string(), json!(text));
                    part.insert("thought".to_string(), json!(true));
                    if let Some(signature) = signature {
                        part.insert("thoughtSignature".to_string(), json!(signature));
                    }
                    parts.push(Value::Object(part));
                }
                // Anthropic-specific; nothing to send to Gemini.
                ContentBlock::RedactedThinking { .. } => {}
            }
        }
        if parts.is_empty() {
            continue;
        }
        contents.push(json!({"role": role, "parts": parts}));
    }

    let mut body = serde_json::Map::new();
    body.insert("contents".to_string(), Value::Array(contents));

    if let Some(system) = &request.system_prompt {
        body.insert(
            "systemInstruction".to_string(),
            json!({"parts": [{"text": system}]}),
        );
    }

    let mut generation_config = serde_json::Map::new();
    if let Some(n) = request.max_output_tokens.filter(|&n| n > 0) {
        generation_config.insert("maxOutputTokens".to_string(), json!(n));
    }
    if let Some(budget) = thinking_budget(request.thinking.level) {
        generation_config.insert(
            "thinkingConfig".to_string(),
            json!({
                "thinkingBudget": budget,
                "includeThoughts": request.thinking.include_summary,
            }),
        );
    }
    if !generation_config.is_empty() {
        body.insert(
            "generationConfig".to_string(),
            Value::Object(generation_config),
        );
    }

    if !request.tools.is_empty() {
        let mut declarations = Vec::<Value>::new();
        for tool in &request.tools {
            let schema: Value = serde_json::from_str(&tool.parameters).map_err(|e| {
                Error::InvalidRequest(format!(
                    "tool '{}' has unparseable parameters JSON: {e}",
                    tool.name
                ))
            })?;
            declarations.push(json!({
                "name": tool.name,
                "description": tool.description,
                "parameters": schema,
            }));
        }
        body.insert(
            "tools".to_string(),
            json!([{"functionDeclarations": declarations}]),
        );

        let config = match &request.tool_choice {
            ToolChoice::Auto => json!({"mode": "AUTO"}),
            ToolChoice::None => json!({"mode": "NONE"}),
            ToolChoice::Required => json!({"mode": "ANY"}),
            ToolChoice::Specific(name) => {
                json!({"mode": "ANY", "allowedFunctionNames": [name]})
            }
        };
        body.insert(
            "toolConfig".to_string(),
            json!({"functionCallingConfig": config}),
        );
    }

    Ok(Value::Object(body))
}
