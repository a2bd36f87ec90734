// AI Service Module
// Provider bindings used by the conversation orchestrator

pub mod anthropic;
pub mod error;
pub mod openai;

use std::time::Duration;

use async_trait::async_trait;

pub use anthropic::AnthropicProvider;
pub use error::{AIError, AIErrorCode, AIResult};
pub use openai::OpenAIProvider;

use crate::models::ai::{AIProvider as AIProviderType, ChatMessage, ChatOptions, ChatResponse, ModelConfig};

/// Trait for AI providers
///
/// Both bindings share the orchestrator's control flow; they differ only in
/// how the transcript and tool schema are encoded on the wire.
#[async_trait]
pub trait AIProvider: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &str;

    /// Perform a chat completion request with the full transcript
    async fn chat_completion(
        &self,
        messages: Vec<ChatMessage>,
        options: ChatOptions,
    ) -> AIResult<ChatResponse>;
}

/// Boxed AI provider type
pub type BoxedAIProvider = Box<dyn AIProvider>;

/// Factory function to create an AI provider from a chat request's model config
///
/// # Arguments
/// * `config` - Provider, model and key chosen by the client
/// * `timeout` - HTTP timeout for each completion request
pub fn create_provider(config: &ModelConfig, timeout: Duration) -> AIResult<BoxedAIProvider> {
    let key = config
        .api_key
        .as_deref()
        .map(str::trim)
        .unwrap_or_default()
        .to_string();

    if config.provider.requires_api_key() && key.is_empty() {
        return Err(AIError::InvalidConfig(format!(
            "{} requires an API key",
            config.provider
        )));
    }

    match config.provider {
        AIProviderType::OpenAI => Ok(Box::new(OpenAIProvider::new(config, key, timeout)?)),
        AIProviderType::Anthropic => Ok(Box::new(AnthropicProvider::new(config, key, timeout)?)),
    }
}

pub(crate) fn http_client(timeout: Duration) -> AIResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AIError::InvalidConfig(format!("Cannot build HTTP client: {}", e)))
}
