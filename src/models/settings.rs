//! Settings Models
//!
//! Application configuration stored in config.json. Secrets are not part of
//! this file; see `storage::secrets`.

use std::path::PathBuf;
use std::time::Duration;

use grounded_chat_core::ProxyConfig;
use grounded_chat_retrieval::{
    DirectFetchConfig, RetryPolicy, SearchStrategyConfig, DEFAULT_REPOSITORY_HOST,
    MAX_CONCURRENT_FETCHES, SUPPORTED_SEARCH_PROVIDERS,
};
use serde::{Deserialize, Serialize};

/// Smallest accepted result cap per retrieval
pub const MIN_RESULT_CHARS: usize = 256;

/// Hard ceiling on retrieval calls per turn
pub const MAX_RETRIEVALS_PER_TURN: usize = 3;

/// Application configuration stored in config.json
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub retrieval: RetrievalSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    /// Outbound proxy shared by model and retrieval clients
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyConfig>,
}

/// Model selection and generation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub planner_model: String,
    pub critic_model: String,
    pub synthesizer_model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai_base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anthropic_base_url: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Per-call generation timeout in seconds
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            planner_model: "gpt-4o-mini".to_string(),
            critic_model: "claude-3-5-sonnet-20240620".to_string(),
            synthesizer_model: "gpt-4o-mini".to_string(),
            openai_base_url: None,
            anthropic_base_url: None,
            temperature: 0.7,
            max_tokens: 1024,
            timeout_secs: 60,
        }
    }
}

impl LlmSettings {
    /// Distinct model ids in planner, critic, synthesizer order
    pub fn models(&self) -> Vec<&str> {
        let mut models: Vec<&str> = Vec::new();
        for model in [&self.planner_model, &self.critic_model, &self.synthesizer_model] {
            if !models.contains(&model.as_str()) {
                models.push(model);
            }
        }
        models
    }
}

/// Retrieval coordinator and strategy settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub attempt_timeout_secs: u64,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_total_attempts: u32,
    pub max_concurrent_fetches: usize,
    /// Cap on normalized content per retrieval
    pub max_result_chars: usize,
    pub max_download_bytes: usize,
    pub search_results: usize,
    /// "duckduckgo", "brave" or "tavily"
    pub search_provider: String,
    /// Hosts (optionally with a path prefix) recognised as repository links
    pub repository_hosts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository_api_url: Option<String>,
    pub allow_private_hosts: bool,
    pub cache_ttl_secs: u64,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        let direct = DirectFetchConfig::default();
        Self {
            attempt_timeout_secs: policy.attempt_timeout.as_secs(),
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            max_total_attempts: policy.max_total_attempts,
            max_concurrent_fetches: MAX_CONCURRENT_FETCHES,
            max_result_chars: grounded_chat_retrieval::DEFAULT_MAX_RESULT_BYTES,
            max_download_bytes: direct.max_download_bytes,
            search_results: SearchStrategyConfig::default().max_results,
            search_provider: "duckduckgo".to_string(),
            repository_hosts: vec![DEFAULT_REPOSITORY_HOST.to_string()],
            repository_api_url: None,
            allow_private_hosts: direct.allow_private_hosts,
            cache_ttl_secs: direct.cache_ttl.as_secs(),
        }
    }
}

impl RetrievalSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            attempt_timeout: Duration::from_secs(self.attempt_timeout_secs),
            max_total_attempts: self.max_total_attempts,
        }
    }

    pub fn direct_config(&self) -> DirectFetchConfig {
        DirectFetchConfig {
            allow_private_hosts: self.allow_private_hosts,
            max_download_bytes: self.max_download_bytes,
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
        }
    }

    pub fn search_config(&self) -> SearchStrategyConfig {
        SearchStrategyConfig {
            max_results: self.search_results,
            max_repository_results: self.search_results,
            fetch_concurrency: self.max_concurrent_fetches,
            // Leaves room in a search attempt for the engine call itself
            hit_timeout: Duration::from_secs(self.attempt_timeout_secs) / 2,
        }
    }
}

/// Orchestration pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub max_retrievals_per_turn: usize,
    /// Recent turns handed to the prompts as context
    pub recent_turns: usize,
    /// Wall-clock budget for all retrieval in one turn, in seconds
    pub retrieval_budget_secs: u64,
    /// Also store planning and critique outputs
    pub persist_trace: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_retrievals_per_turn: MAX_RETRIEVALS_PER_TURN,
            recent_turns: 8,
            retrieval_budget_secs: 60,
            persist_trace: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Overrides ~/.grounded-chat/memory.db
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
}

impl AppConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        let llm = &self.llm;
        for (stage, model) in [
            ("planner_model", &llm.planner_model),
            ("critic_model", &llm.critic_model),
            ("synthesizer_model", &llm.synthesizer_model),
        ] {
            if model.trim().is_empty() {
                return Err(format!("{} cannot be empty", stage));
            }
        }
        if !(0.0..=2.0).contains(&llm.temperature) {
            return Err(format!("temperature must be within 0.0..=2.0, got {}", llm.temperature));
        }
        if llm.max_tokens == 0 {
            return Err("max_tokens must be at least 1".to_string());
        }
        if llm.timeout_secs == 0 {
            return Err("llm timeout_secs must be at least 1".to_string());
        }

        let r = &self.retrieval;
        if r.max_attempts == 0 || r.max_total_attempts == 0 {
            return Err("retrieval attempts must be at least 1".to_string());
        }
        if r.attempt_timeout_secs == 0 {
            return Err("attempt_timeout_secs must be at least 1".to_string());
        }
        if r.attempt_timeout_secs >= self.pipeline.retrieval_budget_secs {
            return Err(format!(
                "attempt_timeout_secs ({}) must be shorter than retrieval_budget_secs ({})",
                r.attempt_timeout_secs, self.pipeline.retrieval_budget_secs
            ));
        }
        if r.base_delay_ms > r.max_delay_ms {
            return Err("base_delay_ms cannot exceed max_delay_ms".to_string());
        }
        if !(1..=MAX_CONCURRENT_FETCHES).contains(&r.max_concurrent_fetches) {
            return Err(format!(
                "max_concurrent_fetches must be within 1..={}",
                MAX_CONCURRENT_FETCHES
            ));
        }
        if r.max_result_chars < MIN_RESULT_CHARS {
            return Err(format!("max_result_chars must be at least {}", MIN_RESULT_CHARS));
        }
        if r.search_results == 0 {
            return Err("search_results must be at least 1".to_string());
        }
        if !SUPPORTED_SEARCH_PROVIDERS.contains(&r.search_provider.to_lowercase().as_str()) {
            return Err(format!(
                "Unknown search provider: '{}'. Supported: {}",
                r.search_provider,
                SUPPORTED_SEARCH_PROVIDERS.join(", ")
            ));
        }
        if r.repository_hosts.iter().any(|h| h.trim().is_empty()) {
            return Err("repository_hosts cannot contain empty entries".to_string());
        }

        if self.pipeline.max_retrievals_per_turn > MAX_RETRIEVALS_PER_TURN {
            return Err(format!(
                "max_retrievals_per_turn cannot exceed {}",
                MAX_RETRIEVALS_PER_TURN
            ));
        }

        Ok(())
    }
}
