pub mod anthropic;
pub mod claude_cli;
pub mod mock;
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use thiserror::Error;

use crate::config::{ProviderConfig, ProviderKind, Settings};

/// One call to a generation backend.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Role text sent as the system message.
    pub system: String,
    /// The assembled prompt.
    pub prompt: String,
    /// Deadline for this call, measured from when it starts.
    pub timeout: Duration,
}

#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("empty response")]
    Empty,

    #[error("unusable response: {0}")]
    Unusable(String),

    #[error("process error: {0}")]
    Process(String),
}

/// A text-generation capability.
///
/// Backends know how to reach one provider; prompt assembly lives in
/// `cynetics-prompts` and retry policy lives in the scheduler.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Human-readable backend name for logging.
    fn name(&self) -> &str;

    /// Optional model hint for logging/display purposes.
    fn model_hint(&self) -> Option<&str> {
        None
    }

    /// Check that the backend is usable. Called once before a run starts.
    async fn preflight_check(&self) -> Result<()>;

    /// Generate a response for the request, honoring its timeout.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}

/// Select the backend for a run from the configured default provider.
pub fn create_backend(settings: &Settings) -> Result<Arc<dyn GenerationBackend>> {
    let Some(provider) = settings.provider(&settings.default_provider) else {
        bail!(
            "default provider '{}' is not configured (known: {})",
            settings.default_provider,
            settings
                .providers
                .iter()
                .map(|p| p.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
    };
    backend_for(provider)
}

fn backend_for(provider: &ProviderConfig) -> Result<Arc<dyn GenerationBackend>> {
    let backend: Arc<dyn GenerationBackend> = match provider.kind {
        ProviderKind::Anthropic => Arc::new(anthropic::AnthropicBackend::new(provider)?),
        ProviderKind::OpenAi => Arc::new(openai::OpenAiBackend::new(provider)?),
        ProviderKind::ClaudeCli => Arc::new(claude_cli::ClaudeCliBackend {
            anthropic_base_url: provider.base_url.clone(),
            model: provider.model.clone(),
            kill_grace: Duration::from_secs(10),
        }),
    };
    Ok(backend)
}

/// Map a reqwest failure onto the error kinds the scheduler understands.
pub(crate) fn request_error(e: reqwest::Error, timeout: Duration) -> GenerationError {
    if e.is_timeout() {
        GenerationError::Timeout(timeout)
    } else {
        GenerationError::Request(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with(kind: ProviderKind) -> Settings {
        let mut settings = Settings::default();
        settings.default_provider = "main".into();
        settings.providers = vec![ProviderConfig {
            name: "main".into(),
            kind,
            model: Some("some-model".into()),
            api_key: Some("key".into()),
            base_url: None,
            temperature: 0.7,
            max_tokens: 4096,
        }];
        settings
    }

    #[test]
    fn creates_configured_backend() {
        let backend = create_backend(&settings_with(ProviderKind::Anthropic)).unwrap();
        assert_eq!(backend.name(), "anthropic");
        assert_eq!(backend.model_hint(), Some("some-model"));

        let backend = create_backend(&settings_with(ProviderKind::OpenAi)).unwrap();
        assert_eq!(backend.name(), "openai");

        let backend = create_backend(&settings_with(ProviderKind::ClaudeCli)).unwrap();
        assert_eq!(backend.name(), "claude-cli");
    }

    #[test]
    fn unknown_default_provider_is_an_error() {
        let mut settings = settings_with(ProviderKind::Anthropic);
        settings.default_provider = "missing".into();
        let err = create_backend(&settings).err().unwrap();
        assert!(err.to_string().contains("'missing' is not configured"));
        assert!(err.to_string().contains("main"));
    }

    #[test]
    fn error_display() {
        assert_eq!(GenerationError::Empty.to_string(), "empty response");
        assert_eq!(
            GenerationError::Timeout(Duration::from_secs(2)).to_string(),
            "generation timed out after 2s"
        );
    }
}
