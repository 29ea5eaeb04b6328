//! Pipeline Integration Tests
//!
//! Full turns with scripted strategies and generators.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use grounded_chat::services::pipeline::{
    HeuristicClassifier, Pipeline, PipelineConfig, PipelineError, Stage, FALLBACK_THOUGHT,
};
use grounded_chat_core::TurnRole;
use grounded_chat_llm::{LlmResult, TextGenerator};
use grounded_chat_retrieval::{
    AttemptContext, ErrorKind, RequestKind, RetrievalCoordinator, RetrievalRequest,
    RetrievalResult, RetrievalStrategy, RetryPolicy, StrategyKind, DEFAULT_MAX_RESULT_BYTES,
};
use tokio_util::sync::CancellationToken;

use crate::support::{MarkerGenerator, RecordingStore};

/// Strategy that answers every attempt with a fixed outcome and records
/// the requests it saw
struct FixedStrategy {
    kind: StrategyKind,
    outcome: Result<&'static str, ErrorKind>,
    seen: Mutex<Vec<RetrievalRequest>>,
}

impl FixedStrategy {
    fn ok(kind: StrategyKind, content: &'static str) -> Arc<Self> {
        Arc::new(Self {
            kind,
            outcome: Ok(content),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn failing(kind: StrategyKind, error: ErrorKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            outcome: Err(error),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn seen(&self) -> Vec<RetrievalRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl RetrievalStrategy for FixedStrategy {
    fn kind(&self) -> StrategyKind {
        self.kind
    }

    async fn attempt(&self, request: &RetrievalRequest, _ctx: &AttemptContext) -> RetrievalResult {
        self.seen.lock().unwrap().push(request.clone());
        match self.outcome {
            Ok(content) => {
                let mut metadata = BTreeMap::new();
                metadata.insert("title".to_string(), format!("{} result", self.kind));
                RetrievalResult::success(self.kind, content, metadata)
            }
            Err(kind) => RetrievalResult::failure(self.kind, kind, "scripted failure"),
        }
    }
}

/// Strategy that never finishes for requests containing `stall_on` and
/// answers everything else
struct StallingStrategy {
    kind: StrategyKind,
    stall_on: &'static str,
}

#[async_trait]
impl RetrievalStrategy for StallingStrategy {
    fn kind(&self) -> StrategyKind {
        self.kind
    }

    async fn attempt(&self, request: &RetrievalRequest, _ctx: &AttemptContext) -> RetrievalResult {
        if request.raw.contains(self.stall_on) {
            std::future::pending::<()>().await;
        }
        RetrievalResult::success(self.kind, format!("page at {}", request.raw), BTreeMap::new())
    }
}

/// Generator that never answers prompts containing `stall_on`
struct StallingGenerator {
    stall_on: &'static str,
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl TextGenerator for StallingGenerator {
    async fn generate(&self, _model_id: &str, prompt: &str) -> LlmResult<String> {
        self.calls.lock().unwrap().push(prompt.to_string());
        if prompt.contains(self.stall_on) {
            std::future::pending::<()>().await;
        }
        Ok("Working on it.".to_string())
    }
}

/// Token that fires after `delay`
fn cancel_after(delay: Duration) -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        trigger.cancel();
    });
    cancel
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
        attempt_timeout: Duration::from_millis(500),
        max_total_attempts: 9,
    }
}

fn coordinator(strategies: Vec<Arc<FixedStrategy>>) -> Arc<RetrievalCoordinator> {
    let coordinator = strategies
        .into_iter()
        .fold(RetrievalCoordinator::new(fast_policy()), |c, s| c.with_strategy(s));
    Arc::new(coordinator)
}

fn classifier() -> Arc<HeuristicClassifier> {
    Arc::new(HeuristicClassifier::new(
        vec!["github.com".to_string(), "example.org/repoHost".to_string()],
        DEFAULT_MAX_RESULT_BYTES,
    ))
}

fn roles(store: &RecordingStore) -> Vec<TurnRole> {
    store.appended.lock().unwrap().iter().map(|r| r.role).collect()
}

#[tokio::test]
async fn test_repository_link_falls_back_to_direct_fetch() {
    let repo_api = FixedStrategy::failing(StrategyKind::RepositoryApi, ErrorKind::NotFound);
    let direct = FixedStrategy::ok(StrategyKind::Direct, "acme/widget is a widget toolkit");
    let search = FixedStrategy::ok(StrategyKind::Search, "unused");
    let store = Arc::new(RecordingStore::default());
    let pipeline = Pipeline::new(
        MarkerGenerator::new(vec![]),
        coordinator(vec![repo_api.clone(), direct.clone(), search.clone()]),
        store.clone(),
        PipelineConfig::default(),
    )
    .with_classifier(classifier());

    let turn = pipeline
        .run_turn("https://example.org/repoHost/acme/widget", &CancellationToken::new())
        .await
        .unwrap();

    let classification = &turn.trace.classification;
    assert!(classification.needs_retrieval);
    assert_eq!(classification.requests.len(), 1);
    assert_eq!(classification.requests[0].kind, RequestKind::RepoRef);

    assert_eq!(repo_api.seen().len(), 1);
    assert_eq!(direct.seen().len(), 1);
    assert!(search.seen().is_empty());

    assert_eq!(turn.retrieval_results.len(), 1);
    assert_eq!(turn.retrieval_results[0].source_strategy, StrategyKind::Direct);
    assert!(turn.grounded());
    assert_eq!(turn.trace.retrievals[0].attempts.len(), 2);
    assert_eq!(roles(&store), vec![TurnRole::User, TurnRole::Assistant]);
}

#[tokio::test]
async fn test_temporal_question_searches_the_input() {
    let search = FixedStrategy::ok(StrategyKind::Search, "Markets rallied on Tuesday.");
    let generator = MarkerGenerator::new(vec![]);
    let pipeline = Pipeline::new(
        generator.clone(),
        coordinator(vec![search.clone()]),
        Arc::new(RecordingStore::default()),
        PipelineConfig::default(),
    )
    .with_classifier(classifier());

    let input = "What's the latest market news today?";
    let turn = pipeline.run_turn(input, &CancellationToken::new()).await.unwrap();

    let seen = search.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].kind, RequestKind::SearchQuery);
    assert_eq!(seen[0].raw, input);
    assert!(turn.grounded());

    // Only the critique prompt carries the retrieved material
    let calls = generator.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 3);
    assert!(!calls[0].contains("Markets rallied"));
    assert!(calls[1].contains("Markets rallied on Tuesday."));
}

#[tokio::test]
async fn test_failed_synthesis_uses_fallback_and_still_stores() {
    let generator = MarkerGenerator::new(vec!["## Your notes"]);
    let store = Arc::new(RecordingStore::default());
    let pipeline = Pipeline::new(
        generator.clone(),
        coordinator(vec![]),
        store.clone(),
        PipelineConfig::default(),
    );

    let turn = pipeline
        .run_turn("Tell me a joke about sprockets", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(turn.final_response, FALLBACK_THOUGHT);
    let synthesis = turn.trace.stage(Stage::Synthesize).unwrap();
    assert!(synthesis.degraded);
    assert_eq!(synthesis.attempts, 2);
    assert!(!turn.trace.stage(Stage::Plan).unwrap().degraded);
    // plan + critique + two synthesis tries
    assert_eq!(generator.call_count(), 4);

    let appended = store.appended.lock().unwrap();
    assert_eq!(appended.len(), 2);
    assert_eq!(appended[1].role, TurnRole::Assistant);
    assert_eq!(appended[1].content, FALLBACK_THOUGHT);
}

#[tokio::test]
async fn test_everything_failing_still_replies() {
    let store = Arc::new(RecordingStore {
        fail_reads: true,
        ..Default::default()
    });
    let pipeline = Pipeline::new(
        MarkerGenerator::new(vec!["## Latest message"]),
        coordinator(vec![
            FixedStrategy::failing(StrategyKind::RepositoryApi, ErrorKind::NetworkFailure),
            FixedStrategy::failing(StrategyKind::Direct, ErrorKind::NetworkFailure),
            FixedStrategy::failing(StrategyKind::Search, ErrorKind::NetworkFailure),
        ]),
        store.clone(),
        PipelineConfig::default(),
    )
    .with_classifier(classifier());

    let turn = pipeline
        .run_turn(
            "What changed in https://github.com/acme/widget this week?",
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(!turn.final_response.is_empty());
    assert_eq!(turn.final_response, FALLBACK_THOUGHT);
    assert!(turn.context_snippets.is_empty());
    assert!(!turn.grounded());
    assert!(turn.trace.is_degraded());
    assert!(turn
        .retrieval_results
        .iter()
        .all(|r| !r.success && r.error_kind == Some(ErrorKind::NetworkFailure)));
    assert_eq!(roles(&store), vec![TurnRole::User, TurnRole::Assistant]);
}

#[tokio::test]
async fn test_persisted_trace_stores_every_stage() {
    let store = Arc::new(RecordingStore::default());
    let config = PipelineConfig {
        persist_trace: true,
        ..Default::default()
    };
    let pipeline = Pipeline::new(MarkerGenerator::new(vec![]), coordinator(vec![]), store.clone(), config);

    pipeline.run_turn("hello there", &CancellationToken::new()).await.unwrap();

    assert_eq!(
        roles(&store),
        vec![TurnRole::User, TurnRole::Planner, TurnRole::Critic, TurnRole::Assistant]
    );
}

#[tokio::test]
async fn test_cancelled_turn_writes_nothing() {
    let store = Arc::new(RecordingStore::default());
    let generator = MarkerGenerator::new(vec![]);
    let pipeline = Pipeline::new(
        generator.clone(),
        coordinator(vec![FixedStrategy::ok(StrategyKind::Search, "news")]),
        store.clone(),
        PipelineConfig::default(),
    );
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = pipeline.run_turn("any news today?", &cancel).await;

    assert_eq!(outcome.unwrap_err(), PipelineError::Cancelled);
    assert!(store.appended.lock().unwrap().is_empty());
    assert_eq!(generator.call_count(), 0);
}

#[tokio::test]
async fn test_budget_keeps_requests_that_finished() {
    let direct = Arc::new(StallingStrategy {
        kind: StrategyKind::Direct,
        stall_on: "slow",
    });
    let coordinator = Arc::new(RetrievalCoordinator::new(fast_policy()).with_strategy(direct));
    let config = PipelineConfig {
        retrieval_budget: Duration::from_millis(200),
        ..Default::default()
    };
    let pipeline = Pipeline::new(
        MarkerGenerator::new(vec![]),
        coordinator,
        Arc::new(RecordingStore::default()),
        config,
    )
    .with_classifier(classifier());

    let turn = pipeline
        .run_turn(
            "Compare https://example.com/fast with https://example.com/slow",
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(turn.retrieval_results.len(), 2);
    let fast = &turn.retrieval_results[0];
    assert!(fast.success);
    assert_eq!(fast.content, "page at https://example.com/fast");
    let slow = &turn.retrieval_results[1];
    assert!(!slow.success);
    assert_eq!(slow.error_kind, Some(ErrorKind::NetworkFailure));
    assert!(turn.trace.retrieval_budget_exhausted);
    assert_eq!(turn.trace.retrievals[0].attempts.len(), 1);
    assert!(turn.trace.retrievals[1].attempts.is_empty());
    assert!(turn.grounded());
}

#[tokio::test]
async fn test_cancel_during_retrieval_writes_nothing() {
    let store = Arc::new(RecordingStore::default());
    let generator = MarkerGenerator::new(vec![]);
    let direct = Arc::new(StallingStrategy {
        kind: StrategyKind::Direct,
        stall_on: "example.com",
    });
    let pipeline = Pipeline::new(
        generator.clone(),
        Arc::new(RetrievalCoordinator::new(fast_policy()).with_strategy(direct)),
        store.clone(),
        PipelineConfig::default(),
    )
    .with_classifier(classifier());

    let cancel = cancel_after(Duration::from_millis(50));
    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        pipeline.run_turn("Summarize https://example.com/report", &cancel),
    )
    .await
    .expect("turn should stop once cancelled");

    assert_eq!(outcome.unwrap_err(), PipelineError::Cancelled);
    assert!(store.appended.lock().unwrap().is_empty());
    // Only the plan ran before the stall
    assert_eq!(generator.call_count(), 1);
}

#[tokio::test]
async fn test_cancel_during_synthesis_writes_nothing() {
    let store = Arc::new(RecordingStore::default());
    let generator = Arc::new(StallingGenerator {
        stall_on: "## Your notes",
        calls: Mutex::new(Vec::new()),
    });
    let pipeline = Pipeline::new(
        generator.clone(),
        coordinator(vec![FixedStrategy::ok(StrategyKind::Search, "Markets rallied.")]),
        store.clone(),
        PipelineConfig::default(),
    )
    .with_classifier(classifier());

    let cancel = cancel_after(Duration::from_millis(50));
    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        pipeline.run_turn("What's the latest market news today?", &cancel),
    )
    .await
    .expect("turn should stop once cancelled");

    assert_eq!(outcome.unwrap_err(), PipelineError::Cancelled);
    assert!(store.appended.lock().unwrap().is_empty());
    // plan, critique, then the stalled synthesis
    assert_eq!(generator.calls.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_context_from_earlier_turns_reaches_prompts() {
    let store = Arc::new(RecordingStore::default());
    let generator = MarkerGenerator::new(vec![]);
    let pipeline = Pipeline::new(generator.clone(), coordinator(vec![]), store.clone(), PipelineConfig::default());

    pipeline
        .run_turn("My favourite sprocket is the Model 7", &CancellationToken::new())
        .await
        .unwrap();
    let turn = pipeline
        .run_turn("Which sprocket did I mention?", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(turn.context_snippets.len(), 2);
    assert!(turn.context_snippets[0].contains("user: My favourite sprocket is the Model 7"));
    let calls = generator.calls.lock().unwrap();
    // Every stage of the second turn sees the earlier message
    assert_eq!(calls.len(), 6);
    assert!(calls[3..].iter().all(|p| p.contains("Model 7")));
}
