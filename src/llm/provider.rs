//! `LlmProvider` trait and the built-in providers.

use async_trait::async_trait;

use crate::error::LlmError;
use crate::llm::LlmBackend;

/// A text completion returned by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub provider: String,
    pub model: String,
    pub text: String,
}

/// Generative text completion.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn provider_name(&self) -> &str;

    fn model_name(&self) -> &str;

    async fn complete(&self, system: &str, user: &str) -> Result<Completion, LlmError>;
}

/// Placeholder client for a configured backend. No network traffic: the
/// completion is a fixed notice naming the backend.
#[derive(Debug, Clone)]
pub struct StubProvider {
    backend: LlmBackend,
    model: String,
}

impl StubProvider {
    pub fn new(backend: LlmBackend, model: impl Into<String>) -> Self {
        Self {
            backend,
            model: model.into(),
        }
    }
}

#[async_trait]
impl LlmProvider for StubProvider {
    fn provider_name(&self) -> &str {
        self.backend.as_str()
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, _system: &str, _user: &str) -> Result<Completion, LlmError> {
        Ok(Completion {
            provider: self.backend.as_str().to_string(),
            model: self.model.clone(),
            text: format!(
                "(stub) Configure the {} client to generate patches.",
                self.backend.display_name()
            ),
        })
    }
}

/// Provider used when no API key is present. Every call fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredProvider;

#[async_trait]
impl LlmProvider for UnconfiguredProvider {
    fn provider_name(&self) -> &str {
        "none"
    }

    fn model_name(&self) -> &str {
        "none"
    }

    async fn complete(&self, _system: &str, _user: &str) -> Result<Completion, LlmError> {
        Err(LlmError::NotConfigured)
    }
}
