//! Shared types for the `trellis` provider client.
//!
//! This crate defines the provider-agnostic data model: conversation
//! messages and content blocks, requests and responses, token usage,
//! finish reasons, thinking configuration, and the normalized stream
//! event vocabulary emitted by every provider's streaming path.
//!
//! Nothing in this crate talks to the network; `trellis-core` translates
//! these types to and from each provider's wire format.

pub mod config_types;
pub mod events;
pub mod models;

pub use config_types::ThinkingConfig;
pub use config_types::ThinkingLevel;
pub use events::ErrorCategory;
pub use events::StreamEvent;
pub use models::ContentBlock;
pub use models::FinishReason;
pub use models::Message;
pub use models::Request;
pub use models::Response;
pub use models::Role;
pub use models::ToolChoice;
pub use models::ToolDefinition;
pub use models::Usage;
