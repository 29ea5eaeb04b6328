//! Repository-API fetch: metadata plus README or a specific file.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::{AttemptContext, RetrievalStrategy};
use crate::github::{RepoApiError, RepoFile, RepoMetadata, RepositoryHost};
use crate::normalizer::{ContentNormalizer, RawPayload};
use crate::repo_ref::RepoRef;
use crate::types::{RetrievalRequest, RetrievalResult, StrategyKind};

pub struct RepositoryStrategy {
    host: Arc<dyn RepositoryHost>,
    hosts: Vec<String>,
}

impl RepositoryStrategy {
    /// `hosts` are the URL prefixes recognised as repository links.
    pub fn new(host: Arc<dyn RepositoryHost>, hosts: Vec<String>) -> Self {
        Self { host, hosts }
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    fn metadata_map(repo: &RepoRef, meta: &RepoMetadata) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        let name = if meta.full_name.is_empty() {
            repo.full_name()
        } else {
            meta.full_name.clone()
        };
        map.insert("name".to_string(), name);
        map.insert("stars".to_string(), meta.stars.to_string());
        map.insert("forks".to_string(), meta.forks.to_string());
        let optional = [
            ("description", &meta.description),
            ("language", &meta.language),
            ("updated_at", &meta.updated_at),
            ("default_branch", &meta.default_branch),
            ("url", &meta.html_url),
        ];
        for (key, value) in optional {
            if let Some(value) = value.as_ref().filter(|v| !v.is_empty()) {
                map.insert(key.to_string(), value.clone());
            }
        }
        map
    }

    async fn fetch(&self, repo: &RepoRef, max_bytes: usize) -> Result<RetrievalResult, RepoApiError> {
        let meta = self.host.get_metadata(&repo.owner, &repo.name).await?;
        let mut metadata = Self::metadata_map(repo, &meta);

        let file: Option<RepoFile> = match &repo.path {
            None => match self.host.get_readme(&repo.owner, &repo.name).await {
                Ok(readme) => {
                    metadata.insert("readme_file".to_string(), readme.name.clone());
                    Some(readme)
                }
                // A repository without a README still has useful metadata
                Err(RepoApiError::NotFound(_)) => None,
                Err(e) => return Err(e),
            },
            Some(path) => {
                let file = self
                    .host
                    .get_file(&repo.owner, &repo.name, path, repo.git_ref.as_deref())
                    .await?;
                metadata.insert("file_path".to_string(), file.path.clone());
                if let Some(git_ref) = &repo.git_ref {
                    metadata.insert("ref".to_string(), git_ref.clone());
                }
                Some(file)
            }
        };

        let normalizer = ContentNormalizer::new(max_bytes);
        let content = match &file {
            Some(file) => normalizer.normalize(RawPayload::Repository {
                summary: Some(&meta),
                body: &file.content,
                markdown: file.is_markdown(),
            }),
            None => normalizer.normalize(RawPayload::Repository {
                summary: Some(&meta),
                body: "Repository found but no README file detected.",
                markdown: false,
            }),
        };

        Ok(RetrievalResult::success(
            StrategyKind::RepositoryApi,
            content,
            metadata,
        ))
    }
}

#[async_trait]
impl RetrievalStrategy for RepositoryStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::RepositoryApi
    }

    async fn attempt(&self, request: &RetrievalRequest, ctx: &AttemptContext) -> RetrievalResult {
        let Some(repo) = RepoRef::parse(&request.raw, &self.hosts) else {
            return RetrievalResult::failure(
                StrategyKind::RepositoryApi,
                crate::types::ErrorKind::UnsupportedContent,
                format!("Not a repository reference: {}", request.raw),
            );
        };

        let outcome = tokio::select! {
            _ = ctx.cancel.cancelled() => return RetrievalResult::cancelled(StrategyKind::RepositoryApi),
            outcome = self.fetch(&repo, request.max_result_bytes) => outcome,
        };

        match outcome {
            Ok(result) => {
                tracing::debug!(repo = %repo, attempt = ctx.attempt, "repository fetch succeeded");
                result
            }
            Err(e) => {
                tracing::debug!(repo = %repo, attempt = ctx.attempt, error = %e, "repository fetch failed");
                RetrievalResult::failure(StrategyKind::RepositoryApi, e.kind(), e.to_string())
            }
        }
    }
}
