//! Wiring for the model registry and the retrieval coordinator.

use std::sync::Arc;
use std::time::Duration;

use grounded_chat_core::ProxyConfig;
use grounded_chat_llm::{ProviderConfig, ProviderRegistry, ProviderType};
use grounded_chat_retrieval::{
    build_fetch_client, create_search_provider, DirectFetchStrategy, FetchLimiter, GitHubClient,
    RepositoryHost, RepositoryStrategy, RetrievalCoordinator, SearchStrategy,
};
use tracing::{info, warn};

use crate::models::settings::{LlmSettings, RetrievalSettings};
use crate::storage::Secrets;
use crate::utils::error::{AppError, AppResult};

/// Provider configuration for every model the pipeline uses
pub fn provider_configs(
    llm: &LlmSettings,
    proxy: Option<&ProxyConfig>,
    secrets: &Secrets,
) -> AppResult<Vec<ProviderConfig>> {
    llm.models()
        .into_iter()
        .map(|model| {
            let provider = ProviderType::infer_from_model(model).ok_or_else(|| {
                AppError::config(format!(
                    "Cannot tell which provider serves model '{}'",
                    model
                ))
            })?;
            let base_url = match provider {
                ProviderType::OpenAI => llm.openai_base_url.clone(),
                ProviderType::Anthropic => llm.anthropic_base_url.clone(),
            };
            if secrets.api_key_for(provider).is_none() {
                warn!(
                    model,
                    env = provider.api_key_env(),
                    "no API key set; generation with this model will fall back"
                );
            }
            Ok(ProviderConfig {
                provider,
                api_key: secrets.api_key_for(provider).map(str::to_string),
                base_url,
                model: model.to_string(),
                max_tokens: llm.max_tokens,
                temperature: llm.temperature,
                timeout_secs: llm.timeout_secs,
                proxy: proxy.cloned(),
            })
        })
        .collect()
}

pub fn build_generator(
    llm: &LlmSettings,
    proxy: Option<&ProxyConfig>,
    secrets: &Secrets,
) -> AppResult<ProviderRegistry> {
    let configs = provider_configs(llm, proxy, secrets)?;
    ProviderRegistry::from_configs(configs)
        .map_err(|e| AppError::config(format!("Failed to create model provider: {}", e)))
}

/// Build the coordinator with the direct, repository and search strategies.
///
/// An unusable search configuration (for example a keyed engine without a
/// key) falls back to DuckDuckGo.
pub fn build_coordinator(
    settings: &RetrievalSettings,
    proxy: Option<&ProxyConfig>,
    secrets: &Secrets,
) -> AppResult<RetrievalCoordinator> {
    let limiter = FetchLimiter::new(settings.max_concurrent_fetches);
    let client = build_fetch_client(proxy, Duration::from_secs(settings.attempt_timeout_secs))
        .map_err(|e| AppError::config(format!("Failed to build HTTP client: {}", e)))?;

    let direct = Arc::new(DirectFetchStrategy::new(
        client.clone(),
        limiter.clone(),
        settings.direct_config(),
    ));

    let mut github = GitHubClient::new(client.clone(), secrets.github_token.clone(), limiter.clone());
    if let Some(url) = &settings.repository_api_url {
        github = github.with_base_url(url.clone());
    }
    let host: Arc<dyn RepositoryHost> = Arc::new(github);
    let repository = Arc::new(RepositoryStrategy::new(
        host.clone(),
        settings.repository_hosts.clone(),
    ));

    let provider = match create_search_provider(
        &settings.search_provider,
        secrets.search_api_key.as_deref(),
        client.clone(),
        limiter.clone(),
    ) {
        Ok(provider) => provider,
        Err(e) => {
            warn!(provider = %settings.search_provider, error = %e, "search provider unavailable, using duckduckgo");
            create_search_provider("duckduckgo", None, client, limiter)
                .map_err(|e| AppError::config(e.to_string()))?
        }
    };
    info!(search = provider.name(), hosts = ?settings.repository_hosts, "retrieval configured");

    let search = Arc::new(SearchStrategy::new(
        provider,
        direct.clone(),
        Some(host),
        settings.search_config(),
    ));

    Ok(RetrievalCoordinator::new(settings.retry_policy())
        .with_strategy(direct)
        .with_strategy(repository)
        .with_strategy(search))
}
