//! LLM integration.
//!
//! Supports three backends, picked by which API key is present:
//! - **OpenAI** (`OPENAI_API_KEY`, `OPENAI_MODEL`)
//! - **Mistral** (`MISTRAL_API_KEY`, `MISTRAL_MODEL`)
//! - **Gemini** (`GEMINI_API_KEY`, `GEMINI_MODEL`)
//!
//! Clients are placeholders: they answer with a fixed notice instead of
//! calling the vendor API. With no key at all, [`UnconfiguredProvider`]
//! fails every request with
//! [`LlmError::NotConfigured`](crate::error::LlmError::NotConfigured).

pub mod provider;

pub use provider::{Completion, LlmProvider, StubProvider, UnconfiguredProvider};

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};

/// Supported LLM backends, in selection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    OpenAi,
    Mistral,
    Gemini,
}

impl LlmBackend {
    pub const ALL: [LlmBackend; 3] = [Self::OpenAi, Self::Mistral, Self::Gemini];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Mistral => "mistral",
            Self::Gemini => "gemini",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::OpenAi => "OpenAI",
            Self::Mistral => "Mistral",
            Self::Gemini => "Gemini",
        }
    }

    fn key_var(&self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Mistral => "MISTRAL_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
        }
    }

    fn model_var(&self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_MODEL",
            Self::Mistral => "MISTRAL_MODEL",
            Self::Gemini => "GEMINI_MODEL",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-5",
            Self::Mistral => "mistral-large-latest",
            Self::Gemini => "gemini-1.5-pro",
        }
    }
}

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: SecretString,
    pub model: String,
}

impl LlmConfig {
    /// First backend with a non-empty API key in the environment.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`LlmConfig::from_env`] over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        LlmBackend::ALL.into_iter().find_map(|backend| {
            let key = lookup(backend.key_var()).filter(|k| !k.trim().is_empty())?;
            let model = lookup(backend.model_var())
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| backend.default_model().to_string());
            Some(Self {
                backend,
                api_key: SecretString::from(key),
                model,
            })
        })
    }

    pub fn has_key(&self) -> bool {
        !self.api_key.expose_secret().is_empty()
    }
}

/// Create an LLM provider from optional configuration.
pub fn create_provider(config: Option<&LlmConfig>) -> Arc<dyn LlmProvider> {
    match config {
        Some(config) if config.has_key() => {
            tracing::info!(
                "Using {} (model: {})",
                config.backend.display_name(),
                config.model
            );
            Arc::new(StubProvider::new(config.backend, &config.model))
        }
        _ => {
            tracing::debug!("No LLM API key configured");
            Arc::new(UnconfiguredProvider)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::error::LlmError;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_no_keys_means_no_config() {
        assert!(LlmConfig::from_lookup(lookup(&[])).is_none());
        assert!(LlmConfig::from_lookup(lookup(&[("OPENAI_API_KEY", "  ")])).is_none());
    }

    #[test]
    fn test_openai_wins_over_others() {
        let cfg = LlmConfig::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "g"),
            ("MISTRAL_API_KEY", "m"),
            ("OPENAI_API_KEY", "o"),
        ]))
        .unwrap();
        assert_eq!(cfg.backend, LlmBackend::OpenAi);
        assert_eq!(cfg.model, "gpt-5");
        assert_eq!(cfg.api_key.expose_secret(), "o");
    }

    #[test]
    fn test_mistral_before_gemini_with_model_override() {
        let cfg = LlmConfig::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "g"),
            ("MISTRAL_API_KEY", "m"),
            ("MISTRAL_MODEL", "mistral-small"),
        ]))
        .unwrap();
        assert_eq!(cfg.backend, LlmBackend::Mistral);
        assert_eq!(cfg.model, "mistral-small");
    }

    #[test]
    fn test_gemini_default_model() {
        let cfg = LlmConfig::from_lookup(lookup(&[("GEMINI_API_KEY", "g")])).unwrap();
        assert_eq!(cfg.backend, LlmBackend::Gemini);
        assert_eq!(cfg.model, "gemini-1.5-pro");
    }

    #[tokio::test]
    async fn test_unconfigured_provider_errors() {
        let provider = create_provider(None);
        let err = provider.complete("sys", "user").await.unwrap_err();
        assert!(matches!(err, LlmError::NotConfigured));
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[tokio::test]
    async fn test_configured_provider_answers() {
        let config = LlmConfig {
            backend: LlmBackend::Mistral,
            api_key: SecretString::from("m-test"),
            model: "mistral-large-latest".to_string(),
        };
        let provider = create_provider(Some(&config));
        assert_eq!(provider.provider_name(), "mistral");
        assert_eq!(provider.model_name(), "mistral-large-latest");

        let completion = provider.complete("sys", "user").await.unwrap();
        assert_eq!(completion.provider, "mistral");
        assert!(completion.text.starts_with("(stub)"));
    }
}
