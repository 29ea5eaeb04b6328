//! Grounded Chat LLM
//!
//! Provides a unified interface for the hosted language-model providers:
//! - Anthropic Claude
//! - OpenAI (and OpenAI-compatible endpoints)
//!
//! On top of the provider trait sits the `TextGenerator` capability used by
//! the orchestration pipeline: "generate text for this prompt with this model".

pub mod anthropic;
pub mod generator;
pub mod http_client;
pub mod openai;
pub mod provider;
pub mod types;

// Re-export main types
pub use anthropic::AnthropicProvider;
pub use generator::{create_provider, ProviderRegistry, TextGenerator};
pub use http_client::build_http_client;
pub use openai::OpenAIProvider;
pub use provider::LlmProvider;
pub use types::*;
