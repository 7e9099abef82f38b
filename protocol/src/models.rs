use serde::Deserialize;
use serde::Serialize;

use crate::config_types::ThinkingConfig;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// One element of a message body.
///
/// `Thinking` carries the provider's opaque signature when one was
/// supplied; the signature must be sent back verbatim for the thought to
/// be accepted on a later turn. `RedactedThinking` is round-tripped as
/// opaque base64 without interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        /// Raw JSON text, exactly as the model produced it.
        arguments: String,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
        is_error: bool,
    },
    Thinking {
        text: String,
        signature: Option<String>,
    },
    RedactedThinking {
        data: String,
    },
}

/// A single conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
    /// Provider-specific metadata (JSON text), carried through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_metadata: Option<String>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
            provider_metadata: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::Text { text: text.into() }],
            provider_metadata: None,
        }
    }
}

/// A callable tool advertised to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters, as JSON text.
    pub parameters: String,
    pub strict: bool,
}

/// How the model may select tools for this request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    Required,
    /// The model must call the named tool.
    Specific(String),
}

/// A provider-agnostic completion request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
    pub model: String,
    #[serde(default)]
    pub thinking: ThinkingConfig,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    /// Maximum tokens to generate. `None` (and `Some(0)`) fall back to
    /// each provider's default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(default)]
    pub tool_choice: ToolChoice,
}

/// Why a generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolUse,
    ContentFilter,
    Error,
    #[default]
    Unknown,
}

/// Token accounting for one request.
///
/// Counters are signed: Gemini reports `candidatesTokenCount` inclusive
/// of thinking tokens, and the derived output count preserves the raw
/// arithmetic even when the provider's fields are inconsistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub thinking_tokens: i64,
    pub cached_tokens: i64,
    pub total_tokens: i64,
}

/// A provider-agnostic completion response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub content: Vec<ContentBlock>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
    /// The model string the provider reports it actually used.
    pub model: Option<String>,
    /// Provider-specific response metadata (JSON text).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_data: Option<String>,
}
