//! Retrieval Strategies
//!
//! Each strategy is one way of turning a request into content. They share a
//! single capability, `attempt`, and report every failure as a typed
//! `RetrievalResult` instead of an error.

mod direct;
mod repository;
mod search;

pub use direct::{DirectFetchConfig, DirectFetchStrategy, USER_AGENTS};
pub use repository::RepositoryStrategy;
pub use search::{mentions_repository, SearchStrategy, SearchStrategyConfig};

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::types::{RetrievalRequest, RetrievalResult, StrategyKind};

/// Per-attempt information handed to a strategy
#[derive(Debug, Clone)]
pub struct AttemptContext {
    /// Zero-based attempt number within the current strategy
    pub attempt: u32,
    pub cancel: CancellationToken,
    /// When the caller stops waiting for this attempt, if it ever does
    pub deadline: Option<Instant>,
}

impl AttemptContext {
    pub fn new(attempt: u32, cancel: CancellationToken) -> Self {
        Self {
            attempt,
            cancel,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// First attempt with a token nobody will cancel
    pub fn detached() -> Self {
        Self::new(0, CancellationToken::new())
    }
}

/// One concrete method of attempting content retrieval
#[async_trait]
pub trait RetrievalStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Attempt a fetch for this request, or fail fast with a typed error.
    async fn attempt(&self, request: &RetrievalRequest, ctx: &AttemptContext) -> RetrievalResult;
}
