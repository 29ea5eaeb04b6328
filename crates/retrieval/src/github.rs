//! Repository-Hosting Client
//!
//! The `RepositoryHost` trait is the boundary the repository strategy talks
//! to. `GitHubClient` implements it against the GitHub REST API.

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::limiter::FetchLimiter;
use crate::types::ErrorKind;

/// Default GitHub REST endpoint
pub const GITHUB_API_URL: &str = "https://api.github.com";

const USER_AGENT: &str = concat!("grounded-chat/", env!("CARGO_PKG_VERSION"));

/// Errors from the repository-hosting API
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RepoApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limited by repository host")]
    RateLimited { retry_after: Option<u64> },

    #[error("Authentication required: {0}")]
    AuthRequired(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Undecodable content: {0}")]
    Decode(String),
}

impl RepoApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RepoApiError::NotFound(_) => ErrorKind::NotFound,
            RepoApiError::RateLimited { .. } => ErrorKind::RateLimited,
            RepoApiError::AuthRequired(_) => ErrorKind::AuthRequired,
            RepoApiError::Network(_) => ErrorKind::NetworkFailure,
            RepoApiError::Decode(_) => ErrorKind::UnsupportedContent,
        }
    }
}

/// Repository metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoMetadata {
    /// `owner/name`
    pub full_name: String,
    pub description: Option<String>,
    pub stars: u64,
    pub forks: u64,
    pub language: Option<String>,
    pub updated_at: Option<String>,
    pub default_branch: Option<String>,
    pub html_url: Option<String>,
}

/// A decoded file from a repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoFile {
    /// File name (README name for README fetches)
    pub name: String,
    pub path: String,
    pub content: String,
}

impl RepoFile {
    pub fn is_markdown(&self) -> bool {
        let lower = self.name.to_ascii_lowercase();
        lower.ends_with(".md") || lower.ends_with(".markdown") || lower == "readme"
    }
}

/// Repository-hosting API capability
#[async_trait]
pub trait RepositoryHost: Send + Sync {
    async fn get_metadata(&self, owner: &str, name: &str) -> Result<RepoMetadata, RepoApiError>;

    async fn get_readme(&self, owner: &str, name: &str) -> Result<RepoFile, RepoApiError>;

    async fn get_file(
        &self,
        owner: &str,
        name: &str,
        path: &str,
        git_ref: Option<&str>,
    ) -> Result<RepoFile, RepoApiError>;

    /// Repositories matching `query`, most starred first
    async fn search_repositories(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<RepoMetadata>, RepoApiError>;
}

/// GitHub REST client
pub struct GitHubClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    limiter: FetchLimiter,
}

impl GitHubClient {
    pub fn new(client: reqwest::Client, token: Option<String>, limiter: FetchLimiter) -> Self {
        Self {
            client,
            base_url: GITHUB_API_URL.to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
            limiter,
        }
    }

    /// Point at a different API root (GitHub Enterprise, test servers)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn get_json(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<serde_json::Value, RepoApiError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header("X-GitHub-Api-Version", "2022-11-28")
            .query(query);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let _permit = self.limiter.acquire().await;
        tracing::debug!(url = %url, "repository api request");

        let response = request.send().await.map_err(|e| {
            RepoApiError::Network(if e.is_timeout() {
                "request timed out".to_string()
            } else {
                e.to_string()
            })
        })?;

        if let Some(err) = status_error(response.status().as_u16(), response.headers(), path) {
            return Err(err);
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| RepoApiError::Decode(e.to_string()))
    }
}

/// Map a non-success status onto a typed error.
fn status_error(
    status: u16,
    headers: &reqwest::header::HeaderMap,
    path: &str,
) -> Option<RepoApiError> {
    let header_u64 = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    };
    match status {
        200..=299 => None,
        401 => Some(RepoApiError::AuthRequired(
            "repository host rejected credentials".to_string(),
        )),
        403 if header_u64("x-ratelimit-remaining") == Some(0) => Some(RepoApiError::RateLimited {
            retry_after: header_u64("retry-after"),
        }),
        403 => Some(RepoApiError::AuthRequired(format!("access denied: {}", path))),
        404 | 410 => Some(RepoApiError::NotFound(path.to_string())),
        429 => Some(RepoApiError::RateLimited {
            retry_after: header_u64("retry-after"),
        }),
        _ => Some(RepoApiError::Network(format!("HTTP {} for {}", status, path))),
    }
}

#[derive(Debug, Deserialize)]
struct GitHubRepo {
    full_name: String,
    description: Option<String>,
    #[serde(default)]
    stargazers_count: u64,
    #[serde(default)]
    forks_count: u64,
    language: Option<String>,
    updated_at: Option<String>,
    default_branch: Option<String>,
    html_url: Option<String>,
}

impl From<GitHubRepo> for RepoMetadata {
    fn from(repo: GitHubRepo) -> Self {
        Self {
            full_name: repo.full_name,
            description: repo.description,
            stars: repo.stargazers_count,
            forks: repo.forks_count,
            language: repo.language,
            updated_at: repo.updated_at,
            default_branch: repo.default_branch,
            html_url: repo.html_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GitHubContent {
    name: String,
    path: String,
    #[serde(default)]
    content: String,
    encoding: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubDirEntry {
    name: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct GitHubSearch {
    #[serde(default)]
    items: Vec<GitHubRepo>,
}

fn decode_content(content: GitHubContent) -> Result<RepoFile, RepoApiError> {
    let text = match content.encoding.as_deref() {
        Some("base64") => {
            let cleaned: String = content
                .content
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect();
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(cleaned)
                .map_err(|e| RepoApiError::Decode(e.to_string()))?;
            String::from_utf8(bytes)
                .map_err(|_| RepoApiError::Decode(format!("{} is not text", content.path)))?
        }
        Some("none") => {
            return Err(RepoApiError::Decode(format!(
                "{} is too large for the contents API",
                content.path
            )))
        }
        _ => content.content,
    };
    Ok(RepoFile {
        name: content.name,
        path: content.path,
        content: text,
    })
}

/// Directory listings come back as arrays; render them as a file list.
fn directory_listing(path: &str, entries: Vec<GitHubDirEntry>) -> RepoFile {
    let lines: Vec<String> = entries
        .into_iter()
        .map(|e| {
            if e.kind == "dir" {
                format!("{}/", e.name)
            } else {
                e.name
            }
        })
        .collect();
    RepoFile {
        name: path.rsplit('/').next().unwrap_or(path).to_string(),
        path: path.to_string(),
        content: lines.join("\n"),
    }
}

#[async_trait]
impl RepositoryHost for GitHubClient {
    async fn get_metadata(&self, owner: &str, name: &str) -> Result<RepoMetadata, RepoApiError> {
        let value = self.get_json(&format!("/repos/{}/{}", owner, name), &[]).await?;
        let repo: GitHubRepo =
            serde_json::from_value(value).map_err(|e| RepoApiError::Decode(e.to_string()))?;
        Ok(repo.into())
    }

    async fn get_readme(&self, owner: &str, name: &str) -> Result<RepoFile, RepoApiError> {
        let value = self
            .get_json(&format!("/repos/{}/{}/readme", owner, name), &[])
            .await?;
        let content: GitHubContent =
            serde_json::from_value(value).map_err(|e| RepoApiError::Decode(e.to_string()))?;
        decode_content(content)
    }

    async fn get_file(
        &self,
        owner: &str,
        name: &str,
        path: &str,
        git_ref: Option<&str>,
    ) -> Result<RepoFile, RepoApiError> {
        let encoded_path: Vec<String> = path
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        let query: Vec<(&str, String)> = git_ref
            .map(|r| vec![("ref", r.to_string())])
            .unwrap_or_default();
        let value = self
            .get_json(
                &format!("/repos/{}/{}/contents/{}", owner, name, encoded_path.join("/")),
                &query,
            )
            .await?;

        if value.is_array() {
            let entries: Vec<GitHubDirEntry> =
                serde_json::from_value(value).map_err(|e| RepoApiError::Decode(e.to_string()))?;
            return Ok(directory_listing(path, entries));
        }
        let content: GitHubContent =
            serde_json::from_value(value).map_err(|e| RepoApiError::Decode(e.to_string()))?;
        decode_content(content)
    }

    async fn search_repositories(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<RepoMetadata>, RepoApiError> {
        let per_page = max_results.clamp(1, 10);
        let value = self
            .get_json(
                "/search/repositories",
                &[
                    ("q", query.to_string()),
                    ("sort", "stars".to_string()),
                    ("order", "desc".to_string()),
                    ("per_page", per_page.to_string()),
                ],
            )
            .await?;
        let search: GitHubSearch =
            serde_json::from_value(value).map_err(|e| RepoApiError::Decode(e.to_string()))?;
        Ok(search
            .items
            .into_iter()
            .take(per_page)
            .map(RepoMetadata::from)
            .collect())
    }
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient")
            .field("base_url", &self.base_url)
            .field("has_token", &self.token.is_some())
            .finish()
    }
}
