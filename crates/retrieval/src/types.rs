//! Retrieval Types
//!
//! Requests, results and the failure taxonomy shared by every strategy and
//! the coordinator.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Default cap on normalized content handed back to callers.
pub const DEFAULT_MAX_RESULT_BYTES: usize = 8 * 1024;

/// What a retrieval request points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Url,
    RepoRef,
    SearchQuery,
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestKind::Url => write!(f, "url"),
            RequestKind::RepoRef => write!(f, "repo_ref"),
            RequestKind::SearchQuery => write!(f, "search_query"),
        }
    }
}

/// A single immutable retrieval request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalRequest {
    pub kind: RequestKind,
    pub raw: String,
    pub max_result_bytes: usize,
}

impl RetrievalRequest {
    pub fn new(kind: RequestKind, raw: impl Into<String>, max_result_bytes: usize) -> Self {
        Self {
            kind,
            raw: raw.into(),
            max_result_bytes,
        }
    }

    pub fn url(raw: impl Into<String>) -> Self {
        Self::new(RequestKind::Url, raw, DEFAULT_MAX_RESULT_BYTES)
    }

    pub fn repo_ref(raw: impl Into<String>) -> Self {
        Self::new(RequestKind::RepoRef, raw, DEFAULT_MAX_RESULT_BYTES)
    }

    pub fn search(raw: impl Into<String>) -> Self {
        Self::new(RequestKind::SearchQuery, raw, DEFAULT_MAX_RESULT_BYTES)
    }

    /// Same request with a different result cap
    pub fn with_max_result_bytes(mut self, max_result_bytes: usize) -> Self {
        self.max_result_bytes = max_result_bytes;
        self
    }
}

/// The closed set of fetch strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Direct,
    RepositoryApi,
    Search,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::Direct => write!(f, "direct"),
            StrategyKind::RepositoryApi => write!(f, "repository_api"),
            StrategyKind::Search => write!(f, "search"),
        }
    }
}

/// Typed retrieval failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NetworkFailure,
    RateLimited,
    NotFound,
    UnsupportedContent,
    AuthRequired,
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::NetworkFailure => write!(f, "network_failure"),
            ErrorKind::RateLimited => write!(f, "rate_limited"),
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::UnsupportedContent => write!(f, "unsupported_content"),
            ErrorKind::AuthRequired => write!(f, "auth_required"),
            ErrorKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl ErrorKind {
    /// Whether another attempt with the same strategy can help
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::NetworkFailure | ErrorKind::RateLimited)
    }

    /// Rank used when several strategies fail; higher is more actionable.
    pub fn specificity(&self) -> u8 {
        match self {
            ErrorKind::Cancelled => 5,
            ErrorKind::RateLimited => 4,
            ErrorKind::AuthRequired => 3,
            ErrorKind::NotFound => 2,
            ErrorKind::UnsupportedContent => 1,
            ErrorKind::NetworkFailure => 0,
        }
    }

    /// Pick the more specific of two failures
    pub fn most_specific(self, other: ErrorKind) -> ErrorKind {
        if other.specificity() > self.specificity() {
            other
        } else {
            self
        }
    }
}

/// Outcome of one strategy attempt or one coordinator call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub source_strategy: StrategyKind,
    pub content: String,
    pub metadata: BTreeMap<String, String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl RetrievalResult {
    pub fn success(
        source_strategy: StrategyKind,
        content: impl Into<String>,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        Self {
            source_strategy,
            content: content.into(),
            metadata,
            success: true,
            error_kind: None,
            error_message: None,
        }
    }

    pub fn failure(
        source_strategy: StrategyKind,
        error_kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source_strategy,
            content: String::new(),
            metadata: BTreeMap::new(),
            success: false,
            error_kind: Some(error_kind),
            error_message: Some(message.into()),
        }
    }

    pub fn cancelled(source_strategy: StrategyKind) -> Self {
        Self::failure(source_strategy, ErrorKind::Cancelled, "retrieval cancelled")
    }

    pub fn is_cancelled(&self) -> bool {
        self.error_kind == Some(ErrorKind::Cancelled)
    }

    /// Value of a metadata key, if present
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(ErrorKind::NetworkFailure.is_retryable());
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(!ErrorKind::NotFound.is_retryable());
        assert!(!ErrorKind::AuthRequired.is_retryable());
        assert!(!ErrorKind::UnsupportedContent.is_retryable());
        assert!(!ErrorKind::Cancelled.is_retryable());
    }

    #[test]
    fn test_rate_limit_beats_network_failure() {
        assert_eq!(
            ErrorKind::NetworkFailure.most_specific(ErrorKind::RateLimited),
            ErrorKind::RateLimited
        );
        assert_eq!(
            ErrorKind::RateLimited.most_specific(ErrorKind::NotFound),
            ErrorKind::RateLimited
        );
        assert_eq!(
            ErrorKind::NotFound.most_specific(ErrorKind::Cancelled),
            ErrorKind::Cancelled
        );
    }

    #[test]
    fn test_failure_result_shape() {
        let result = RetrievalResult::failure(StrategyKind::Direct, ErrorKind::NotFound, "404");
        assert!(!result.success);
        assert!(result.content.is_empty());
        assert_eq!(result.error_kind, Some(ErrorKind::NotFound));

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["source_strategy"], "direct");
        assert_eq!(json["error_kind"], "not_found");
    }

    #[test]
    fn test_request_builders() {
        let req = RetrievalRequest::search("rust async").with_max_result_bytes(512);
        assert_eq!(req.kind, RequestKind::SearchQuery);
        assert_eq!(req.max_result_bytes, 512);
    }
}
