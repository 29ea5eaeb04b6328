//! Text Generation Capability
//!
//! The uniform "generate text from prompt" surface the orchestration layer
//! consumes, plus a registry that routes model ids to concrete providers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::anthropic::AnthropicProvider;
use super::openai::OpenAIProvider;
use super::provider::LlmProvider;
use super::types::{
    LlmError, LlmRequestOptions, LlmResult, Message, ProviderConfig, ProviderType,
};

/// Generate a single completion for a prompt on a named model.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, model_id: &str, prompt: &str) -> LlmResult<String>;
}

/// Create a provider from configuration
pub fn create_provider(config: ProviderConfig) -> LlmResult<Arc<dyn LlmProvider>> {
    match config.provider {
        ProviderType::Anthropic => Ok(Arc::new(AnthropicProvider::new(config)?)),
        ProviderType::OpenAI => Ok(Arc::new(OpenAIProvider::new(config)?)),
    }
}

/// Routes model ids to the provider that serves them.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its own model id.
    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        self.providers
            .insert(provider.model().to_string(), provider);
    }

    /// Build one provider per distinct model in `configs`.
    pub fn from_configs(configs: impl IntoIterator<Item = ProviderConfig>) -> LlmResult<Self> {
        let mut registry = Self::new();
        for config in configs {
            if registry.providers.contains_key(&config.model) {
                continue;
            }
            registry.register(create_provider(config)?);
        }
        Ok(registry)
    }

    pub fn models(&self) -> Vec<&str> {
        let mut models: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        models.sort_unstable();
        models
    }
}

#[async_trait]
impl TextGenerator for ProviderRegistry {
    async fn generate(&self, model_id: &str, prompt: &str) -> LlmResult<String> {
        let provider = self
            .providers
            .get(model_id)
            .ok_or_else(|| LlmError::ModelNotFound {
                model: model_id.to_string(),
            })?;

        tracing::debug!(
            provider = provider.name(),
            model = model_id,
            prompt_chars = prompt.len(),
            "generating"
        );

        let response = provider
            .send_message(
                vec![Message::user(prompt)],
                None,
                LlmRequestOptions::default(),
            )
            .await?;

        match response.content {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => Err(LlmError::ParseError {
                message: format!("{} returned no text", provider.name()),
            }),
        }
    }
}
