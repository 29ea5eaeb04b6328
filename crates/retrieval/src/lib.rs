//! Grounded Chat Retrieval
//!
//! Fetches external knowledge for the orchestration pipeline under
//! unreliable network conditions.
//!
//! ## Module Organization
//!
//! - `strategy` - Direct, repository-API and search fetch strategies
//! - `coordinator` - Strategy chains, retry with backoff, fallback ordering
//! - `normalizer` - Markup stripping and whitespace-boundary truncation
//! - `github` - Repository-hosting API client
//! - `search` - Search-engine providers
//! - `repo_ref` - Repository URL recognition
//! - `limiter` - Bound on simultaneous outbound fetches
//!
//! Failures never leave this crate as errors: `RetrievalCoordinator::resolve`
//! always returns a `RetrievalResult`.

pub mod client;
pub mod coordinator;
pub mod github;
pub mod limiter;
pub mod normalizer;
pub mod repo_ref;
pub mod search;
pub mod strategy;
pub mod types;

pub use client::build_fetch_client;
pub use coordinator::{AttemptLog, AttemptRecord, RetrievalCoordinator, RetryPolicy};
pub use github::{GitHubClient, RepoApiError, RepoFile, RepoMetadata, RepositoryHost};
pub use limiter::{FetchLimiter, MAX_CONCURRENT_FETCHES};
pub use normalizer::{ContentNormalizer, RawPayload};
pub use repo_ref::{RepoRef, DEFAULT_REPOSITORY_HOST};
pub use search::{create_search_provider, SearchError, SearchHit, SearchProvider, SUPPORTED_SEARCH_PROVIDERS};
pub use strategy::{
    mentions_repository, AttemptContext, DirectFetchConfig, DirectFetchStrategy, RepositoryStrategy,
    RetrievalStrategy, SearchStrategy, SearchStrategyConfig,
};
pub use types::{
    ErrorKind, RequestKind, RetrievalRequest, RetrievalResult, StrategyKind, DEFAULT_MAX_RESULT_BYTES,
};
