//! Secrets
//!
//! API keys and tokens come from the environment (optionally seeded from a
//! `.env` file by the binary). They are never written to config.json.

use grounded_chat_llm::ProviderType;

pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";
pub const GITHUB_TOKEN: &str = "GITHUB_TOKEN";
pub const SEARCH_API_KEY: &str = "SEARCH_API_KEY";

/// Credentials available to this process
#[derive(Clone, Default)]
pub struct Secrets {
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub github_token: Option<String>,
    pub search_api_key: Option<String>,
}

impl Secrets {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any name → value lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            openai_api_key: get(OPENAI_API_KEY),
            anthropic_api_key: get(ANTHROPIC_API_KEY),
            github_token: get(GITHUB_TOKEN),
            search_api_key: get(SEARCH_API_KEY),
        }
    }

    pub fn api_key_for(&self, provider: ProviderType) -> Option<&str> {
        match provider {
            ProviderType::OpenAI => self.openai_api_key.as_deref(),
            ProviderType::Anthropic => self.anthropic_api_key.as_deref(),
        }
    }
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |v: &Option<String>| if v.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("Secrets")
            .field("openai_api_key", &mask(&self.openai_api_key))
            .field("anthropic_api_key", &mask(&self.anthropic_api_key))
            .field("github_token", &mask(&self.github_token))
            .field("search_api_key", &mask(&self.search_api_key))
            .finish()
    }
}
