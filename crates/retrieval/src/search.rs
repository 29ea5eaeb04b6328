//! Search Engines
//!
//! Pluggable web search with support for Tavily, Brave Search, and DuckDuckGo providers.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::limiter::FetchLimiter;
use crate::types::ErrorKind;

/// Names accepted by `create_search_provider`
pub const SUPPORTED_SEARCH_PROVIDERS: &[&str] = &["duckduckgo", "brave", "tavily"];

/// A search result entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Search errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SearchError {
    #[error("Search query cannot be empty")]
    EmptyQuery,

    #[error("{0} requires an API key")]
    MissingApiKey(String),

    #[error("Unknown search provider: '{0}'. Supported: tavily, brave, duckduckgo")]
    UnknownProvider(String),

    #[error("Search provider rate limited the request")]
    RateLimited,

    #[error("Search provider rejected credentials")]
    AuthRequired,

    #[error("Search request failed: {0}")]
    Network(String),

    #[error("Failed to parse search response: {0}")]
    Decode(String),
}

impl SearchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SearchError::RateLimited => ErrorKind::RateLimited,
            SearchError::AuthRequired | SearchError::MissingApiKey(_) => ErrorKind::AuthRequired,
            SearchError::Network(_) => ErrorKind::NetworkFailure,
            SearchError::EmptyQuery
            | SearchError::UnknownProvider(_)
            | SearchError::Decode(_) => ErrorKind::UnsupportedContent,
        }
    }
}

/// Trait for pluggable search providers
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Provider name for display
    fn name(&self) -> &str;

    /// Execute a search query
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, SearchError>;
}

/// Strip control characters; reject queries with nothing left.
pub fn sanitize_query(query: &str) -> Result<String, SearchError> {
    let cleaned: String = query
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() {
        Err(SearchError::EmptyQuery)
    } else {
        Ok(cleaned)
    }
}

async fn send_json(
    limiter: &FetchLimiter,
    request: reqwest::RequestBuilder,
    provider: &str,
) -> Result<serde_json::Value, SearchError> {
    let _permit = limiter.acquire().await;
    let response = request
        .send()
        .await
        .map_err(|e| SearchError::Network(format!("{} request failed: {}", provider, e)))?;

    let status = response.status().as_u16();
    match status {
        200..=299 => {}
        401 | 403 => return Err(SearchError::AuthRequired),
        429 => return Err(SearchError::RateLimited),
        _ => {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Network(format!(
                "{} API error ({}): {}",
                provider,
                status,
                body.chars().take(200).collect::<String>()
            )));
        }
    }

    response
        .json()
        .await
        .map_err(|e| SearchError::Decode(format!("{}: {}", provider, e)))
}

fn str_field<'a>(item: &'a serde_json::Value, key: &str) -> &'a str {
    item.get(key).and_then(|v| v.as_str()).unwrap_or("")
}

/// Tavily search provider (requires API key)
struct TavilyProvider {
    client: reqwest::Client,
    limiter: FetchLimiter,
    api_key: String,
}

#[async_trait]
impl SearchProvider for TavilyProvider {
    fn name(&self) -> &str {
        "Tavily"
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, SearchError> {
        let body = serde_json::json!({
            "api_key": self.api_key,
            "query": query,
            "max_results": max_results,
            "include_answer": false,
        });
        let request = self.client.post("https://api.tavily.com/search").json(&body);
        let data = send_json(&self.limiter, request, self.name()).await?;

        Ok(data
            .get("results")
            .and_then(|r| r.as_array())
            .map(|arr| {
                arr.iter()
                    .map(|item| SearchHit {
                        title: str_field(item, "title").to_string(),
                        url: str_field(item, "url").to_string(),
                        snippet: str_field(item, "content").to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Brave Search provider (requires API key)
struct BraveSearchProvider {
    client: reqwest::Client,
    limiter: FetchLimiter,
    api_key: String,
}

#[async_trait]
impl SearchProvider for BraveSearchProvider {
    fn name(&self) -> &str {
        "Brave Search"
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, SearchError> {
        let count = max_results.to_string();
        let request = self
            .client
            .get("https://api.search.brave.com/res/v1/web/search")
            .header("X-Subscription-Token", &self.api_key)
            .header("Accept", "application/json")
            .query(&[("q", query), ("count", count.as_str())]);
        let data = send_json(&self.limiter, request, self.name()).await?;

        Ok(data
            .get("web")
            .and_then(|w| w.get("results"))
            .and_then(|r| r.as_array())
            .map(|arr| {
                arr.iter()
                    .map(|item| SearchHit {
                        title: str_field(item, "title").to_string(),
                        url: str_field(item, "url").to_string(),
                        snippet: str_field(item, "description").to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// DuckDuckGo instant answer provider (no API key required, limited results)
struct DuckDuckGoProvider {
    client: reqwest::Client,
    limiter: FetchLimiter,
}

/// Pull hits out of an instant-answer payload.
fn parse_duckduckgo(data: &serde_json::Value, max_results: usize) -> Vec<SearchHit> {
    let mut results = Vec::new();

    // Abstract (main result)
    let abstract_text = str_field(data, "AbstractText");
    if !abstract_text.is_empty() {
        let heading = str_field(data, "Heading");
        results.push(SearchHit {
            title: if heading.is_empty() { "Result" } else { heading }.to_string(),
            url: str_field(data, "AbstractURL").to_string(),
            snippet: abstract_text.to_string(),
        });
    }

    // Related topics; grouped topics nest their entries under "Topics"
    let mut topics: Vec<&serde_json::Value> = Vec::new();
    if let Some(related) = data.get("RelatedTopics").and_then(|r| r.as_array()) {
        for topic in related {
            match topic.get("Topics").and_then(|t| t.as_array()) {
                Some(nested) => topics.extend(nested.iter()),
                None => topics.push(topic),
            }
        }
    }
    for topic in topics {
        if results.len() >= max_results {
            break;
        }
        let text = str_field(topic, "Text");
        if text.is_empty() {
            continue;
        }
        results.push(SearchHit {
            title: text.chars().take(80).collect(),
            url: str_field(topic, "FirstURL").to_string(),
            snippet: text.to_string(),
        });
    }

    results.truncate(max_results);
    results
}

#[async_trait]
impl SearchProvider for DuckDuckGoProvider {
    fn name(&self) -> &str {
        "DuckDuckGo"
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, SearchError> {
        let request = self
            .client
            .get("https://api.duckduckgo.com/")
            .query(&[("q", query), ("format", "json"), ("no_html", "1")]);
        let data = send_json(&self.limiter, request, self.name()).await?;
        Ok(parse_duckduckgo(&data, max_results))
    }
}

/// Create a search provider by name.
///
/// - `"tavily"` requires an API key
/// - `"brave"` requires an API key
/// - `"duckduckgo"` works without an API key (limited results)
pub fn create_search_provider(
    provider_name: &str,
    api_key: Option<&str>,
    client: reqwest::Client,
    limiter: FetchLimiter,
) -> Result<Arc<dyn SearchProvider>, SearchError> {
    let key = api_key.map(str::trim).filter(|k| !k.is_empty());
    match provider_name.to_lowercase().as_str() {
        "tavily" => {
            let key = key.ok_or_else(|| SearchError::MissingApiKey("Tavily".to_string()))?;
            Ok(Arc::new(TavilyProvider {
                client,
                limiter,
                api_key: key.to_string(),
            }))
        }
        "brave" | "brave_search" => {
            let key = key.ok_or_else(|| SearchError::MissingApiKey("Brave Search".to_string()))?;
            Ok(Arc::new(BraveSearchProvider {
                client,
                limiter,
                api_key: key.to_string(),
            }))
        }
        "duckduckgo" | "" => Ok(Arc::new(DuckDuckGoProvider { client, limiter })),
        other => Err(SearchError::UnknownProvider(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> reqwest::Client {
        reqwest::Client::new()
    }

    #[test]
    fn test_create_duckduckgo_provider() {
        let provider = create_search_provider("duckduckgo", None, client(), FetchLimiter::default());
        assert_eq!(provider.unwrap().name(), "DuckDuckGo");
    }

    #[test]
    fn test_create_default_provider() {
        assert!(create_search_provider("", None, client(), FetchLimiter::default()).is_ok());
    }

    #[test]
    fn test_keyed_providers_require_key() {
        assert_eq!(
            create_search_provider("tavily", None, client(), FetchLimiter::default()).err(),
            Some(SearchError::MissingApiKey("Tavily".to_string()))
        );
        assert!(create_search_provider("brave", Some("  "), client(), FetchLimiter::default()).is_err());
        assert!(create_search_provider("brave", Some("k"), client(), FetchLimiter::default()).is_ok());
    }

    #[test]
    fn test_unknown_provider() {
        let err = create_search_provider("altavista", None, client(), FetchLimiter::default()).err();
        assert_eq!(err, Some(SearchError::UnknownProvider("altavista".to_string())));
    }

    #[test]
    fn test_sanitize_query() {
        assert_eq!(sanitize_query("  rust\u{0007}  tokio\n").unwrap(), "rust tokio");
        assert_eq!(sanitize_query("\u{0000}\t\n"), Err(SearchError::EmptyQuery));
    }

    #[test]
    fn test_parse_duckduckgo() {
        let data = serde_json::json!({
            "Heading": "Rust",
            "AbstractText": "A systems language",
            "AbstractURL": "https://en.wikipedia.org/wiki/Rust",
            "RelatedTopics": [
                {"Text": "Cargo - package manager", "FirstURL": "https://duckduckgo.com/Cargo"},
                {"Name": "Group", "Topics": [
                    {"Text": "Ferris - mascot", "FirstURL": "https://duckduckgo.com/Ferris"}
                ]},
                {"Text": "Clippy - linter", "FirstURL": "https://duckduckgo.com/Clippy"}
            ]
        });
        let hits = parse_duckduckgo(&data, 3);
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].title, "Rust");
        assert_eq!(hits[2].url, "https://duckduckgo.com/Ferris");
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(SearchError::RateLimited.kind(), ErrorKind::RateLimited);
        assert_eq!(
            SearchError::Network("down".into()).kind(),
            ErrorKind::NetworkFailure
        );
    }
}
