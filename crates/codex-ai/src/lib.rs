//! AI completion providers for codex generation.
//!
//! Generation code talks to a [`CompletionProvider`] trait object so the
//! hosted OpenAI-compatible API and the offline [`MockProvider`] are
//! interchangeable. The provider is selected from [`AiConfig`] at startup by
//! [`build_provider`].

pub mod config;
pub mod error;
pub mod mock;
pub mod openai;

pub use config::AiConfig;
pub use error::AiError;
pub use mock::MockProvider;
pub use openai::OpenAiClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A single chat-style completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// System prompt framing the assistant's role.
    pub system: String,
    /// User prompt carrying the founder's material and the task.
    pub user: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
}

/// Generated text plus token accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl Completion {
    /// Prompt plus completion tokens.
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

/// Common interface of every text generation backend.
#[async_trait]
pub trait CompletionProvider: Send + Sync + std::fmt::Debug {
    /// Short provider identifier used in logs.
    fn name(&self) -> &str;

    /// Runs one completion.
    ///
    /// # Errors
    ///
    /// Returns [`AiError`] for transport failures, non-success API responses,
    /// and responses without any text.
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, AiError>;
}

/// Builds the provider named by `config.provider` (`"openai"` or `"mock"`).
///
/// # Errors
///
/// Returns [`AiError::Config`] for unknown providers or a missing API key.
pub fn build_provider(config: &AiConfig) -> Result<Arc<dyn CompletionProvider>, AiError> {
    match config.provider.as_str() {
        "openai" => {
            if config.api_key.trim().is_empty() {
                return Err(AiError::Config(
                    "ai.api_key is required for the openai provider".to_string(),
                ));
            }
            Ok(Arc::new(OpenAiClient::new(config)?))
        }
        "mock" => {
            tracing::warn!("using the mock AI provider; generated codexes are placeholders");
            Ok(Arc::new(MockProvider::new()))
        }
        other => Err(AiError::Config(format!("unknown ai.provider: {}", other))),
    }
}
