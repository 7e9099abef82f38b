//! Model capability table.
//!
//! Maps model-name prefixes to thinking support. The provider request
//! serializers consult this table through
//! [`ensure_thinking_supported`] before a request goes on the wire, so
//! asking for thinking on a model recorded as non-thinking fails with
//! invalid-arg instead of a provider-side rejection. Budget maxima
//! match the high-level budgets each provider accepts; effort-based
//! models (OpenAI reasoning) carry 0.

use crate::error::Error;
use crate::error::Result;
use crate::providers::ProviderKind;

#[derive(Debug, Clone, Copy)]
pub struct ModelCapability {
    pub prefix: &'static str,
    pub provider: ProviderKind,
    pub supports_thinking: bool,
    /// Maximum thinking-token budget; 0 when effort-based or unsupported.
    pub max_thinking_tokens: u32,
}

const MODEL_CAPABILITIES: &[ModelCapability] = &[
    ModelCapability {
        prefix: "gpt-5",
        provider: ProviderKind::OpenAi,
        supports_thinking: true,
        max_thinking_tokens: 0,
    },
    ModelCapability {
        prefix: "gpt-4",
        provider: ProviderKind::OpenAi,
        supports_thinking: false,
        max_thinking_tokens: 0,
    },
    ModelCapability {
        prefix: "o1-",
        provider: ProviderKind::OpenAi,
        supports_thinking: true,
        max_thinking_tokens: 0,
    },
    ModelCapability {
        prefix: "o3",
        provider: ProviderKind::OpenAi,
        supports_thinking: true,
        max_thinking_tokens: 0,
    },
    ModelCapability {
        prefix: "claude-opus-",
        provider: ProviderKind::Anthropic,
        supports_thinking: true,
        max_thinking_tokens: 43008,
    },
    ModelCapability {
        prefix: "claude-sonnet-",
        provider: ProviderKind::Anthropic,
        supports_thinking: true,
        max_thinking_tokens: 43008,
    },
    ModelCapability {
        prefix: "claude-haiku-",
        provider: ProviderKind::Anthropic,
        supports_thinking: false,
        max_thinking_tokens: 0,
    },
    ModelCapability {
        prefix: "gemini-2.5-",
        provider: ProviderKind::Google,
        supports_thinking: true,
        max_thinking_tokens: 21888,
    },
    ModelCapability {
        prefix: "gemini-1.5-",
        provider: ProviderKind::Google,
        supports_thinking: false,
        max_thinking_tokens: 0,
    },
];

/// Longest-prefix lookup into the capability table.
pub fn find_capability(model: &str) -> Option<&'static ModelCapability> {
    MODEL_CAPABILITIES
        .iter()
        .filter(|cap| model.starts_with(cap.prefix))
        .max_by_key(|cap| cap.prefix.len())
}

/// Whether a model supports thinking. Unknown models report `false`.
pub fn model_supports_thinking(model: &str) -> bool {
    find_capability(model).is_some_and(|cap| cap.supports_thinking)
}

/// Maximum thinking-token budget for a model; 0 when effort-based,
/// unsupported, or unknown.
pub fn max_thinking_tokens(model: &str) -> u32 {
    find_capability(model).map_or(0, |cap| cap.max_thinking_tokens)
}

/// Reject a thinking request on a model the table records as
/// non-thinking. Models absent from the table pass through, so new
/// model names keep working before the table learns about them.
pub fn ensure_thinking_supported(model: &str) -> Result<()> {
    if let Some(cap) = find_capability(model)
        && !cap.supports_thinking
    {
        return Err(Error::InvalidRequest(format!(
            "model '{model}' does not support thinking"
        )));
    }
    Ok(())
}
