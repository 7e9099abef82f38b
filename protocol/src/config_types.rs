use serde::Deserialize;
use serde::Serialize;

/// Provider-agnostic thinking budget level.
///
/// Each provider maps the level to its own knob at serialization time:
/// Anthropic to a `budget_tokens` integer, OpenAI to a
/// `reasoning_effort` string, Gemini to a `thinkingBudget` integer.
/// The core treats the level itself as opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ThinkingConfig {
    pub level: ThinkingLevel,
    /// Ask the provider to include a thinking summary in the response.
    pub include_summary: bool,
}

impl ThinkingConfig {
    pub fn enabled(&self) -> bool {
        self.level != ThinkingLevel::None
    }
}
