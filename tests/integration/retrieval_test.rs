//! Retrieval Integration Tests
//!
//! Real `DirectFetchStrategy` and `SearchStrategy` against a loopback server.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use grounded_chat_retrieval::{
    ErrorKind, RepoApiError, RepositoryStrategy, RetrievalCoordinator, RetrievalRequest,
    RetryPolicy, SearchError, SearchHit, SearchProvider, SearchStrategy, SearchStrategyConfig,
    StrategyKind,
};
use tokio_util::sync::CancellationToken;

use crate::support::{loopback_direct, FailingHost, LoopbackServer, Route, SilentServer};

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        attempt_timeout: Duration::from_secs(3),
        max_total_attempts: 9,
    }
}

const ARTICLE: &str = "<html><head><title>Widget Handbook</title></head>\
    <body><nav>Home | Pricing | Login</nav>\
    <main><h1>Widgets</h1><p>Widgets turn cranks into sprockets.</p></main>\
    <footer>Copyright</footer></body></html>";

#[tokio::test]
async fn test_direct_fetch_returns_normalized_page() {
    let server = LoopbackServer::start(vec![("/article", Route::html(ARTICLE))]).await;
    let coordinator = RetrievalCoordinator::new(fast_policy()).with_strategy(loopback_direct());

    let (result, log) = coordinator
        .resolve_traced(&RetrievalRequest::url(server.url("/article")), &CancellationToken::new())
        .await;

    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(result.source_strategy, StrategyKind::Direct);
    assert_eq!(result.meta("title"), Some("Widget Handbook"));
    assert!(result.content.contains("Widgets turn cranks into sprockets."));
    assert!(!result.content.contains("Pricing"));
    assert!(!result.content.contains('<'));
    assert_eq!(log.attempts.len(), 1);
    assert_eq!(log.successful_strategy, Some(StrategyKind::Direct));
}

#[tokio::test]
async fn test_repository_not_found_falls_back_to_direct() {
    let server = LoopbackServer::start(vec![(
        "/repoHost/acme/widget",
        Route::html("<html><body><p>acme/widget: a widget toolkit</p></body></html>"),
    )])
    .await;
    let host_prefix = format!("{}/repoHost", server.addr);
    let repository = RepositoryStrategy::new(
        Arc::new(FailingHost(RepoApiError::NotFound("acme/widget".to_string()))),
        vec![host_prefix],
    );
    let coordinator = RetrievalCoordinator::new(fast_policy())
        .with_strategy(Arc::new(repository))
        .with_strategy(loopback_direct());

    let request = RetrievalRequest::repo_ref(server.url("/repoHost/acme/widget"));
    let (result, log) = coordinator.resolve_traced(&request, &CancellationToken::new()).await;

    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(result.source_strategy, StrategyKind::Direct);
    assert!(result.content.contains("a widget toolkit"));

    // NotFound is not retried: one repository attempt, then direct
    let strategies: Vec<StrategyKind> = log.attempts.iter().map(|a| a.strategy).collect();
    assert_eq!(strategies, vec![StrategyKind::RepositoryApi, StrategyKind::Direct]);
    assert_eq!(log.attempts[0].error_kind, Some(ErrorKind::NotFound));
    assert_eq!(server.hits("/repoHost/acme/widget"), 1);
}

#[tokio::test]
async fn test_unreachable_host_fails_within_worst_case() {
    // Reserve a port, then free it so nothing is listening
    let port = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let policy = fast_policy();
    let bound = policy.worst_case(1) + Duration::from_secs(2);
    let coordinator = RetrievalCoordinator::new(policy).with_strategy(loopback_direct());

    let started = Instant::now();
    let (result, log) = coordinator
        .resolve_traced(
            &RetrievalRequest::url(format!("http://127.0.0.1:{}/gone", port)),
            &CancellationToken::new(),
        )
        .await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::NetworkFailure));
    assert!(result.content.is_empty());
    assert_eq!(log.attempts.len(), 3);
    assert!(started.elapsed() < bound);
}

#[tokio::test]
async fn test_rate_limited_is_retried_and_reported() {
    let server = LoopbackServer::start(vec![("/busy", Route::status(429))]).await;
    let coordinator = RetrievalCoordinator::new(fast_policy()).with_strategy(loopback_direct());

    let (result, log) = coordinator
        .resolve_traced(&RetrievalRequest::url(server.url("/busy")), &CancellationToken::new())
        .await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::RateLimited));
    assert_eq!(log.attempts.len(), 3);
    assert_eq!(server.hits("/busy"), 3);
}

#[tokio::test]
async fn test_binary_content_is_not_retried() {
    let server = LoopbackServer::start(vec![(
        "/logo.png",
        Route {
            status: 200,
            content_type: "image/png",
            body: vec![0x89, b'P', b'N', b'G', 0, 0, 0, 13],
        },
    )])
    .await;
    let coordinator = RetrievalCoordinator::new(fast_policy()).with_strategy(loopback_direct());

    let result = coordinator
        .resolve(&RetrievalRequest::url(server.url("/logo.png")), &CancellationToken::new())
        .await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::UnsupportedContent));
    assert_eq!(server.total_hits(), 1);
}

#[tokio::test]
async fn test_cancelled_before_start_makes_no_requests() {
    let server = LoopbackServer::start(vec![("/article", Route::html(ARTICLE))]).await;
    let coordinator = RetrievalCoordinator::new(fast_policy()).with_strategy(loopback_direct());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = coordinator
        .resolve(&RetrievalRequest::url(server.url("/article")), &cancel)
        .await;

    assert!(result.is_cancelled());
    assert_eq!(server.total_hits(), 0);
}

/// Search provider that always returns the same hits
struct LoopbackSearch(Vec<SearchHit>);

#[async_trait]
impl SearchProvider for LoopbackSearch {
    fn name(&self) -> &str {
        "loopback"
    }

    async fn search(&self, _query: &str, max_results: usize) -> Result<Vec<SearchHit>, SearchError> {
        Ok(self.0.iter().take(max_results).cloned().collect())
    }
}

#[tokio::test]
async fn test_search_fetches_hit_pages() {
    let server = LoopbackServer::start(vec![("/article", Route::html(ARTICLE))]).await;
    let hits = vec![
        SearchHit {
            title: "Widget Handbook".to_string(),
            url: server.url("/article"),
            snippet: "All about widgets".to_string(),
        },
        SearchHit {
            title: "Dead link".to_string(),
            url: server.url("/missing"),
            snippet: "Sprockets explained".to_string(),
        },
    ];
    let search = SearchStrategy::new(
        Arc::new(LoopbackSearch(hits)),
        loopback_direct(),
        None,
        SearchStrategyConfig::default(),
    );
    let coordinator = RetrievalCoordinator::new(fast_policy()).with_strategy(Arc::new(search));

    let result = coordinator
        .resolve(&RetrievalRequest::search("how do widgets work"), &CancellationToken::new())
        .await;

    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(result.source_strategy, StrategyKind::Search);
    assert_eq!(result.meta("provider"), Some("loopback"));
    assert_eq!(result.meta("fetched"), Some("1"));
    assert_eq!(result.meta("snippet_only"), Some("1"));
    assert!(result.content.contains("Widgets turn cranks into sprockets."));
    assert!(result.content.contains("Sprockets explained"));
    assert_eq!(server.hits("/missing"), 1);
}

/// Search provider that takes a while before answering
struct SlowSearch {
    delay: Duration,
    hits: Vec<SearchHit>,
}

#[async_trait]
impl SearchProvider for SlowSearch {
    fn name(&self) -> &str {
        "slow"
    }

    async fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<SearchHit>, SearchError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.hits.clone())
    }
}

#[tokio::test]
async fn test_stalled_hit_page_falls_back_to_snippet() {
    let silent = SilentServer::start().await;
    let search = SearchStrategy::new(
        Arc::new(SlowSearch {
            delay: Duration::from_millis(150),
            hits: vec![SearchHit {
                title: "Sprocket FAQ".to_string(),
                url: silent.url("/faq"),
                snippet: "Sprockets explained".to_string(),
            }],
        }),
        loopback_direct(),
        None,
        SearchStrategyConfig::default(),
    );
    let policy = RetryPolicy {
        attempt_timeout: Duration::from_millis(400),
        ..fast_policy()
    };
    let coordinator = RetrievalCoordinator::new(policy).with_strategy(Arc::new(search));

    let (result, log) = coordinator
        .resolve_traced(&RetrievalRequest::search("what is a sprocket"), &CancellationToken::new())
        .await;

    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(result.meta("fetched"), Some("0"));
    assert_eq!(result.meta("snippet_only"), Some("1"));
    assert!(result.content.contains("Sprockets explained"));
    assert_eq!(log.attempts.len(), 1);
}
