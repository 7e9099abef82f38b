//! Thin construction façade: map a model name plus API keys to a ready
//! provider instance.

use std::sync::Arc;

use crate::error::Error;
use crate::error::Result;
use crate::providers::Provider;
use crate::providers::ProviderKind;
use crate::providers::anthropic::AnthropicProvider;
use crate::providers::google::GoogleProvider;
use crate::providers::infer_provider;
use crate::providers::openai::OpenAiProvider;

/// API keys for the providers a caller has access to.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub google_api_key: Option<String>,
}

impl Credentials {
    fn key_for(&self, kind: ProviderKind) -> Option<&str> {
        match kind {
            ProviderKind::OpenAi => self.openai_api_key.as_deref(),
            ProviderKind::Anthropic => self.anthropic_api_key.as_deref(),
            ProviderKind::Google => self.google_api_key.as_deref(),
        }
    }
}

/// Construct a provider instance by explicit kind.
pub fn create_provider(kind: ProviderKind, api_key: impl Into<String>) -> Arc<dyn Provider> {
    match kind {
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(api_key)),
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(api_key)),
        ProviderKind::Google => Arc::new(GoogleProvider::new(api_key)),
    }
}

/// Infer the provider from the model name and construct it with the
/// matching credential.
pub fn provider_for_model(model: &str, credentials: &Credentials) -> Result<Arc<dyn Provider>> {
    let kind = infer_provider(model).ok_or_else(|| {
        Error::InvalidRequest(format!("cannot infer provider for model '{model}'"))
    })?;
    let api_key = credentials.key_for(kind).ok_or_else(|| {
        Error::InvalidRequest(format!("no API key configured for {}", kind.as_str()))
    })?;
    Ok(create_provider(kind, api_key))
}
