//! Retrieval Coordinator
//!
//! Picks the strategy chain for a request, retries each strategy with
//! exponential backoff and falls through the chain until one succeeds.
//! Failures never escape as errors: the caller always gets a
//! `RetrievalResult`, carrying the most specific failure seen when every
//! strategy is exhausted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::strategy::{AttemptContext, RetrievalStrategy};
use crate::types::{ErrorKind, RequestKind, RetrievalRequest, RetrievalResult, StrategyKind};

/// Retry and timeout settings for one `resolve` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts per strategy
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles each time
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Deadline for a single strategy attempt
    pub attempt_timeout: Duration,
    /// Ceiling across every strategy in the chain
    pub max_total_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(4),
            attempt_timeout: Duration::from_secs(15),
            max_total_attempts: 9,
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the zero-based `attempt` failed.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Worst-case wall-clock time of one `resolve` call
    pub fn worst_case(&self, strategies: usize) -> Duration {
        let per_strategy = self.max_attempts.min(self.max_total_attempts);
        let total_attempts = (per_strategy as usize * strategies).min(self.max_total_attempts as usize) as u32;
        let retries = per_strategy.saturating_sub(1);
        let backoff: Duration = (0..retries).map(|a| self.backoff(a)).sum();
        self.attempt_timeout * total_attempts + backoff * strategies as u32
    }
}

/// Record of a single strategy attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub strategy: StrategyKind,
    /// Zero-based attempt number within the strategy
    pub attempt: u32,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
}

/// Every attempt made by one `resolve` call, in order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptLog {
    pub attempts: Vec<AttemptRecord>,
    pub total_duration_ms: u64,
    pub successful_strategy: Option<StrategyKind>,
}

impl AttemptLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_attempt(&mut self, record: AttemptRecord) {
        self.total_duration_ms += record.duration_ms;
        if record.success {
            self.successful_strategy = Some(record.strategy);
        }
        self.attempts.push(record);
    }

    pub fn failed_attempts_count(&self) -> usize {
        self.attempts.iter().filter(|a| !a.success).count()
    }
}

/// Sequences strategies for each request kind
pub struct RetrievalCoordinator {
    strategies: HashMap<StrategyKind, Arc<dyn RetrievalStrategy>>,
    policy: RetryPolicy,
}

impl RetrievalCoordinator {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            strategies: HashMap::new(),
            policy,
        }
    }

    /// Register a strategy under its own kind, replacing any previous one.
    pub fn with_strategy(mut self, strategy: Arc<dyn RetrievalStrategy>) -> Self {
        self.strategies.insert(strategy.kind(), strategy);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Strategy order for a request kind
    pub fn chain_for(kind: RequestKind) -> &'static [StrategyKind] {
        match kind {
            RequestKind::RepoRef => &[StrategyKind::RepositoryApi, StrategyKind::Direct],
            RequestKind::Url => &[StrategyKind::Direct],
            RequestKind::SearchQuery => &[StrategyKind::Search],
        }
    }

    /// Resolve a request to the first successful result.
    pub async fn resolve(
        &self,
        request: &RetrievalRequest,
        cancel: &CancellationToken,
    ) -> RetrievalResult {
        self.resolve_traced(request, cancel).await.0
    }

    /// Same as `resolve`, also returning the attempt log.
    pub async fn resolve_traced(
        &self,
        request: &RetrievalRequest,
        cancel: &CancellationToken,
    ) -> (RetrievalResult, AttemptLog) {
        let chain = Self::chain_for(request.kind);
        let mut log = AttemptLog::new();
        let mut total_attempts = 0u32;
        let mut best_failure: Option<RetrievalResult> = None;

        info!(kind = %request.kind, raw = %request.raw, "resolving retrieval request");

        'chain: for &kind in chain {
            let Some(strategy) = self.strategies.get(&kind) else {
                debug!(strategy = %kind, "strategy not configured, skipping");
                continue;
            };

            for attempt in 0..self.policy.max_attempts {
                if total_attempts >= self.policy.max_total_attempts {
                    warn!(max = self.policy.max_total_attempts, "attempt ceiling reached");
                    break 'chain;
                }
                if cancel.is_cancelled() {
                    return (RetrievalResult::cancelled(kind), log);
                }
                total_attempts += 1;

                let started_at = Utc::now();
                let started = Instant::now();
                let deadline = tokio::time::Instant::now() + self.policy.attempt_timeout;
                let ctx = AttemptContext::new(attempt, cancel.clone()).with_deadline(deadline);
                let result = tokio::select! {
                    _ = cancel.cancelled() => RetrievalResult::cancelled(kind),
                    outcome = tokio::time::timeout_at(deadline, strategy.attempt(request, &ctx)) => match outcome {
                        Ok(result) => result,
                        Err(_) => RetrievalResult::failure(
                            kind,
                            ErrorKind::NetworkFailure,
                            format!("attempt timed out after {}ms", self.policy.attempt_timeout.as_millis()),
                        ),
                    },
                };
                let duration_ms = started.elapsed().as_millis() as u64;

                log.add_attempt(AttemptRecord {
                    strategy: kind,
                    attempt,
                    success: result.success,
                    error_kind: result.error_kind,
                    error_message: result.error_message.clone(),
                    duration_ms,
                    started_at,
                });

                if result.success {
                    info!(strategy = %kind, attempt, duration_ms, "retrieval succeeded");
                    return (result, log);
                }
                if result.is_cancelled() {
                    return (result, log);
                }

                let error_kind = result.error_kind.unwrap_or(ErrorKind::NetworkFailure);
                warn!(
                    strategy = %kind,
                    attempt,
                    error_kind = %error_kind,
                    error = result.error_message.as_deref().unwrap_or(""),
                    "retrieval attempt failed"
                );

                best_failure = match best_failure {
                    Some(best) => {
                        let best_kind = best.error_kind.unwrap_or(ErrorKind::NetworkFailure);
                        // Ties keep the earlier failure
                        if best_kind.most_specific(error_kind) == best_kind {
                            Some(best)
                        } else {
                            Some(result)
                        }
                    }
                    None => Some(result),
                };

                if !error_kind.is_retryable() {
                    debug!(strategy = %kind, error_kind = %error_kind, "not retryable, next strategy");
                    break;
                }

                let last_for_strategy = attempt + 1 >= self.policy.max_attempts;
                if !last_for_strategy && total_attempts < self.policy.max_total_attempts {
                    let delay = self.policy.backoff(attempt);
                    debug!(delay_ms = delay.as_millis() as u64, "waiting before retry");
                    tokio::select! {
                        _ = cancel.cancelled() => return (RetrievalResult::cancelled(kind), log),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        let failure = best_failure.unwrap_or_else(|| {
            RetrievalResult::failure(
                chain.first().copied().unwrap_or(StrategyKind::Direct),
                ErrorKind::UnsupportedContent,
                format!("no retrieval strategy available for {}", request.kind),
            )
        });
        warn!(
            kind = %request.kind,
            attempts = log.attempts.len(),
            error_kind = ?failure.error_kind,
            "retrieval exhausted all strategies"
        );
        (failure, log)
    }
}
