//! Search fetch: query a search engine, then fetch each top hit directly.
//!
//! A hit whose page cannot be fetched still contributes its snippet.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio::time::Instant;

use super::{AttemptContext, DirectFetchStrategy, RetrievalStrategy};
use crate::github::{RepoMetadata, RepositoryHost};
use crate::normalizer::{ContentNormalizer, RawPayload};
use crate::search::{sanitize_query, SearchHit, SearchProvider};
use crate::types::{ErrorKind, RetrievalRequest, RetrievalResult, StrategyKind};

/// Terms that make a query worth a repository search too
const REPOSITORY_TERMS: &[&str] = &["github", "repository", "repositories", "repo", "repos"];

/// Smallest per-hit share of the result budget worth fetching for
const MIN_PER_HIT_BYTES: usize = 256;

/// Share of the attempt's remaining time that hit fetches may use, in
/// quarters. The rest is left for assembling the result.
const HIT_SHARE_QUARTERS: u32 = 3;

#[derive(Debug, Clone)]
pub struct SearchStrategyConfig {
    /// Web hits to fetch (top N)
    pub max_results: usize,
    /// Repository hits appended for repository-flavoured queries
    pub max_repository_results: usize,
    /// Hits fetched at once
    pub fetch_concurrency: usize,
    /// Upper bound on fetching hit pages, shortened further when the
    /// attempt has a nearer deadline
    pub hit_timeout: Duration,
}

impl Default for SearchStrategyConfig {
    fn default() -> Self {
        Self {
            max_results: 3,
            max_repository_results: 3,
            fetch_concurrency: crate::limiter::MAX_CONCURRENT_FETCHES,
            hit_timeout: Duration::from_secs(8),
        }
    }
}

/// Whether a query mentions code hosting
pub fn mentions_repository(query: &str) -> bool {
    let lower = query.to_lowercase();
    lower.contains("source code")
        || lower
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| REPOSITORY_TERMS.contains(&word))
}

pub struct SearchStrategy {
    provider: Arc<dyn SearchProvider>,
    direct: Arc<DirectFetchStrategy>,
    repositories: Option<Arc<dyn RepositoryHost>>,
    config: SearchStrategyConfig,
}

/// One section of the combined search result
struct Section {
    title: String,
    url: String,
    body: String,
    fetched: bool,
}

impl Section {
    fn render(&self, index: usize) -> String {
        let mut out = format!("[{}] {}", index + 1, self.title);
        if !self.url.is_empty() {
            out.push('\n');
            out.push_str(&self.url);
        }
        if !self.body.is_empty() {
            out.push('\n');
            out.push_str(&self.body);
        }
        out
    }
}

impl SearchStrategy {
    pub fn new(
        provider: Arc<dyn SearchProvider>,
        direct: Arc<DirectFetchStrategy>,
        repositories: Option<Arc<dyn RepositoryHost>>,
        config: SearchStrategyConfig,
    ) -> Self {
        Self {
            provider,
            direct,
            repositories,
            config,
        }
    }

    /// When hit fetches must be done by, measured from now.
    fn hit_deadline(&self, ctx: &AttemptContext) -> Instant {
        let now = Instant::now();
        let own = now + self.config.hit_timeout;
        match ctx.deadline {
            Some(deadline) => {
                let share = deadline.saturating_duration_since(now) * HIT_SHARE_QUARTERS / 4;
                own.min(now + share)
            }
            None => own,
        }
    }

    /// Fetch each hit's page, falling back to its snippet.
    async fn expand_hits(&self, hits: Vec<SearchHit>, per_hit: usize, ctx: &AttemptContext) -> Vec<Section> {
        let direct = &self.direct;
        let snippet_normalizer = ContentNormalizer::new(per_hit);
        let deadline = self.hit_deadline(ctx);
        stream::iter(hits)
            .map(|hit| async move {
                let page = if hit.url.is_empty() {
                    None
                } else {
                    let request = RetrievalRequest::url(hit.url.clone()).with_max_result_bytes(per_hit);
                    let single = AttemptContext::new(ctx.attempt, ctx.cancel.clone()).with_deadline(deadline);
                    match tokio::time::timeout_at(deadline, direct.attempt(&request, &single)).await {
                        Ok(result) if result.success && !result.content.is_empty() => Some(result.content),
                        Ok(result) => {
                            tracing::debug!(
                                url = %hit.url,
                                error_kind = ?result.error_kind,
                                "search hit unfetchable, using snippet"
                            );
                            None
                        }
                        Err(_) => {
                            tracing::debug!(url = %hit.url, "search hit too slow, using snippet");
                            None
                        }
                    }
                };
                let fetched = page.is_some();
                let body = page.unwrap_or_else(|| snippet_normalizer.normalize(RawPayload::Text(&hit.snippet)));
                Section {
                    title: hit.title,
                    url: hit.url,
                    body,
                    fetched,
                }
            })
            .buffered(self.config.fetch_concurrency.max(1))
            .collect()
            .await
    }

    async fn repository_hits(&self, query: &str) -> Vec<RepoMetadata> {
        let Some(host) = &self.repositories else {
            return Vec::new();
        };
        if self.config.max_repository_results == 0 || !mentions_repository(query) {
            return Vec::new();
        }
        match host
            .search_repositories(query, self.config.max_repository_results)
            .await
        {
            Ok(repos) => repos,
            Err(e) => {
                tracing::debug!(error = %e, "repository search failed, continuing with web hits");
                Vec::new()
            }
        }
    }

    async fn run(&self, request: &RetrievalRequest, ctx: &AttemptContext) -> RetrievalResult {
        let query = match sanitize_query(&request.raw) {
            Ok(q) => q,
            Err(e) => return RetrievalResult::failure(StrategyKind::Search, e.kind(), e.to_string()),
        };

        let (web, repos) = tokio::join!(
            self.provider.search(&query, self.config.max_results),
            self.repository_hits(&query)
        );

        let mut hits = match web {
            Ok(hits) => hits,
            Err(e) if repos.is_empty() => {
                return RetrievalResult::failure(StrategyKind::Search, e.kind(), e.to_string())
            }
            Err(e) => {
                tracing::debug!(error = %e, "web search failed, using repository hits only");
                Vec::new()
            }
        };
        hits.truncate(self.config.max_results);

        if hits.is_empty() && repos.is_empty() {
            return RetrievalResult::failure(
                StrategyKind::Search,
                ErrorKind::NotFound,
                format!("No results for \"{}\"", query),
            );
        }

        let sections_total = hits.len() + repos.len();
        let per_hit = (request.max_result_bytes / sections_total).max(MIN_PER_HIT_BYTES);

        let mut sections = self.expand_hits(hits, per_hit, ctx).await;
        if ctx.cancel.is_cancelled() {
            return RetrievalResult::cancelled(StrategyKind::Search);
        }
        let fetched = sections.iter().filter(|s| s.fetched).count();
        let snippet_only = sections.len() - fetched;

        let repo_normalizer = ContentNormalizer::new(per_hit);
        for repo in &repos {
            let mut title = format!("{} ({} stars", repo.full_name, repo.stars);
            if let Some(language) = &repo.language {
                title.push_str(", ");
                title.push_str(language);
            }
            title.push(')');
            sections.push(Section {
                title,
                url: repo.html_url.clone().unwrap_or_default(),
                body: repo_normalizer.normalize(RawPayload::Text(
                    repo.description.as_deref().unwrap_or_default(),
                )),
                fetched: false,
            });
        }

        let joined = sections
            .iter()
            .enumerate()
            .map(|(i, s)| s.render(i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let content = ContentNormalizer::new(request.max_result_bytes).normalize(RawPayload::Text(&joined));

        let mut metadata = BTreeMap::new();
        metadata.insert("query".to_string(), query);
        metadata.insert("provider".to_string(), self.provider.name().to_string());
        metadata.insert("results".to_string(), sections.len().to_string());
        metadata.insert("fetched".to_string(), fetched.to_string());
        metadata.insert("snippet_only".to_string(), snippet_only.to_string());
        metadata.insert("repository_hits".to_string(), repos.len().to_string());
        if let Some(first) = sections.first() {
            metadata.insert("title".to_string(), first.title.clone());
        }

        RetrievalResult::success(StrategyKind::Search, content, metadata)
    }
}

#[async_trait]
impl RetrievalStrategy for SearchStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Search
    }

    async fn attempt(&self, request: &RetrievalRequest, ctx: &AttemptContext) -> RetrievalResult {
        tokio::select! {
            _ = ctx.cancel.cancelled() => RetrievalResult::cancelled(StrategyKind::Search),
            result = self.run(request, ctx) => result,
        }
    }
}
