//! Root of the `trellis-core` library.
//!
//! A unified async client for three LLM HTTP services (OpenAI,
//! Anthropic, Google Gemini). Each provider implements the [`Provider`]
//! trait; requests use the normalized model from `trellis-protocol`,
//! streaming responses arrive as normalized [`StreamEvent`]s, and every
//! failure maps to exactly one [`ErrorCategory`].

pub mod client;
pub mod error;
pub mod http;
pub mod model_info;
pub mod providers;
pub mod sse;
mod util;

pub use client::Credentials;
pub use client::provider_for_model;
pub use error::ApiError;
pub use error::Error;
pub use error::Result;
pub use providers::EventStream;
pub use providers::Provider;
pub use providers::ProviderKind;
pub use providers::anthropic::AnthropicProvider;
pub use providers::google::GoogleProvider;
pub use providers::infer_provider;
pub use providers::openai::OpenAiProvider;
pub use sse::SseEvent;
pub use sse::SseParser;
pub use trellis_protocol::ErrorCategory;
pub use trellis_protocol::StreamEvent;
