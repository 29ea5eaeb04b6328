//! Orchestration Pipeline
//!
//! One turn runs four stages in a fixed order:
//!
//! 1. **Classify** - does the turn need external knowledge, and which explicit
//!    references does it contain
//! 2. **Plan** - analytical framing of the message (one generation call)
//! 3. **Critique** - bounded retrieval, then a grounded second perspective
//! 4. **Synthesize** - the single first-person reply
//!
//! Generation failures are retried once and then replaced by a neutral
//! fallback text, and retrieval failures only remove grounding, so a turn
//! always ends with a reply. The one exception is cancellation, which ends
//! the turn immediately and skips every store write.

pub mod classify;
pub mod prompts;
pub mod trace;

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::{self, StreamExt};
use grounded_chat_core::{ContextStore, TurnRecord, TurnRole};
use grounded_chat_llm::TextGenerator;
use grounded_chat_retrieval::{
    AttemptLog, ErrorKind, RetrievalCoordinator, RetrievalRequest, RetrievalResult,
    MAX_CONCURRENT_FETCHES,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::settings::{AppConfig, MAX_RETRIEVALS_PER_TURN};
use crate::services::context::ContextAssembler;

pub use classify::{Classification, HeuristicClassifier, RetrievalClassifier};
pub use prompts::FALLBACK_THOUGHT;
pub use trace::{PipelineTurn, Stage, StageRecord, TurnTrace};

/// Generation calls per stage: the first try plus one retry
const GENERATION_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("turn cancelled")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub planner_model: String,
    pub critic_model: String,
    pub synthesizer_model: String,
    pub max_retrievals_per_turn: usize,
    /// Wall-clock budget for all retrieval in one turn
    pub retrieval_budget: Duration,
    pub max_result_bytes: usize,
    pub recent_turns: usize,
    /// Also append planning and critique outputs to the store
    pub persist_trace: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_settings(&AppConfig::default())
    }
}

impl PipelineConfig {
    pub fn from_settings(config: &AppConfig) -> Self {
        Self {
            planner_model: config.llm.planner_model.clone(),
            critic_model: config.llm.critic_model.clone(),
            synthesizer_model: config.llm.synthesizer_model.clone(),
            max_retrievals_per_turn: config.pipeline.max_retrievals_per_turn,
            retrieval_budget: Duration::from_secs(config.pipeline.retrieval_budget_secs),
            max_result_bytes: config.retrieval.max_result_chars,
            recent_turns: config.pipeline.recent_turns,
            persist_trace: config.pipeline.persist_trace,
        }
    }
}

/// Output of one generation stage
struct StageOutput {
    text: String,
    record: StageRecord,
}

pub struct Pipeline {
    generator: Arc<dyn TextGenerator>,
    coordinator: Arc<RetrievalCoordinator>,
    store: Arc<dyn ContextStore>,
    assembler: ContextAssembler,
    classifier: Arc<dyn RetrievalClassifier>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        coordinator: Arc<RetrievalCoordinator>,
        store: Arc<dyn ContextStore>,
        config: PipelineConfig,
    ) -> Self {
        let assembler = ContextAssembler::new(store.clone(), config.recent_turns);
        let classifier = Arc::new(HeuristicClassifier::new(
            vec![grounded_chat_retrieval::DEFAULT_REPOSITORY_HOST.to_string()],
            config.max_result_bytes,
        ));
        Self {
            generator,
            coordinator,
            store,
            assembler,
            classifier,
            config,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn RetrievalClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one turn.
    ///
    /// Returns `Err(Cancelled)` only when `cancel` fires; nothing is written
    /// to the store in that case.
    pub async fn run_turn(
        &self,
        user_input: &str,
        cancel: &CancellationToken,
    ) -> Result<PipelineTurn, PipelineError> {
        let started = Instant::now();
        let mut turn = PipelineTurn::new(user_input.trim());
        check_cancelled(cancel)?;

        turn.context_snippets = match self.assembler.assemble() {
            Ok(snippets) => snippets,
            Err(e) => {
                warn!(error = %e, "context unavailable, continuing without history");
                Vec::new()
            }
        };

        // Classify
        let classification = self.classifier.classify(&turn.user_input);
        debug!(
            turn_id = %turn.trace.turn_id,
            stage = %Stage::Classify,
            needs_retrieval = classification.needs_retrieval,
            requests = classification.requests.len(),
            signals = ?classification.signals,
            "classified turn"
        );
        turn.trace.classification = classification.clone();

        // Plan
        let plan = self
            .generate_stage(
                Stage::Plan,
                &self.config.planner_model,
                &prompts::plan_prompt(&turn.user_input, &turn.context_snippets),
                cancel,
            )
            .await?;
        turn.plan_output = plan.text;
        turn.trace.stages.push(plan.record);

        // Critique
        if classification.needs_retrieval && self.config.max_retrievals_per_turn > 0 {
            let requests = self.retrieval_requests(&classification, &turn.user_input);
            let (results, logs, exhausted) = self.retrieve(requests, cancel).await?;
            turn.retrieval_results = results;
            turn.trace.retrievals = logs;
            turn.trace.retrieval_budget_exhausted = exhausted;
        }
        let critique = self
            .generate_stage(
                Stage::Critique,
                &self.config.critic_model,
                &prompts::critique_prompt(
                    &turn.user_input,
                    &turn.context_snippets,
                    &turn.plan_output,
                    &turn.retrieval_results,
                    classification.needs_retrieval,
                ),
                cancel,
            )
            .await?;
        turn.critique_output = critique.text;
        turn.trace.stages.push(critique.record);

        // Synthesize
        let synthesis = self
            .generate_stage(
                Stage::Synthesize,
                &self.config.synthesizer_model,
                &prompts::synthesis_prompt(
                    &turn.user_input,
                    &turn.context_snippets,
                    &turn.plan_output,
                    &turn.critique_output,
                ),
                cancel,
            )
            .await?;
        turn.final_response = synthesis.text;
        turn.trace.stages.push(synthesis.record);

        check_cancelled(cancel)?;
        self.persist(&mut turn);

        turn.trace.total_duration_ms = started.elapsed().as_millis() as u64;
        info!(
            turn_id = %turn.trace.turn_id,
            duration_ms = turn.trace.total_duration_ms,
            retrievals = turn.retrieval_results.len(),
            grounded = turn.grounded(),
            degraded = turn.trace.is_degraded(),
            "turn complete"
        );
        Ok(turn)
    }

    /// Explicit references first; a search over the input when there are none.
    fn retrieval_requests(&self, classification: &Classification, user_input: &str) -> Vec<RetrievalRequest> {
        let limit = self.config.max_retrievals_per_turn.min(MAX_RETRIEVALS_PER_TURN);
        let mut requests: Vec<RetrievalRequest> = classification
            .requests
            .iter()
            .take(limit)
            .map(|r| r.clone().with_max_result_bytes(self.config.max_result_bytes))
            .collect();
        if requests.is_empty() {
            requests.push(
                RetrievalRequest::search(user_input).with_max_result_bytes(self.config.max_result_bytes),
            );
        }
        requests
    }

    /// Resolve requests concurrently within the per-turn budget.
    ///
    /// Returns results in request order, one attempt log per request, and
    /// whether the budget ran out. Requests still running at the deadline
    /// become failures; the ones that finished keep their results.
    async fn retrieve(
        &self,
        requests: Vec<RetrievalRequest>,
        cancel: &CancellationToken,
    ) -> Result<(Vec<RetrievalResult>, Vec<AttemptLog>, bool), PipelineError> {
        let coordinator = &self.coordinator;
        let deadline = tokio::time::Instant::now() + self.config.retrieval_budget;
        let resolve_all = stream::iter(requests.iter())
            .map(|request| async move {
                tokio::time::timeout_at(deadline, coordinator.resolve_traced(request, cancel))
                    .await
                    .ok()
            })
            .buffered(MAX_CONCURRENT_FETCHES)
            .collect::<Vec<_>>();

        let outcomes = tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            outcomes = resolve_all => outcomes,
        };
        check_cancelled(cancel)?;

        let mut exhausted = false;
        let mut results = Vec::with_capacity(requests.len());
        let mut logs = Vec::with_capacity(requests.len());
        for (request, outcome) in requests.iter().zip(outcomes) {
            let (result, log) = outcome.unwrap_or_else(|| {
                exhausted = true;
                let result = RetrievalResult::failure(
                    RetrievalCoordinator::chain_for(request.kind)[0],
                    ErrorKind::NetworkFailure,
                    "retrieval budget exhausted",
                );
                (result, AttemptLog::new())
            });
            debug!(
                strategy = %result.source_strategy,
                success = result.success,
                error_kind = ?result.error_kind,
                "retrieval finished"
            );
            results.push(result);
            logs.push(log);
        }
        if exhausted {
            warn!(
                budget_ms = self.config.retrieval_budget.as_millis() as u64,
                "retrieval budget exhausted, continuing with what finished"
            );
        }
        Ok((results, logs, exhausted))
    }

    /// One generation call, retried once, then the fallback text.
    async fn generate_stage(
        &self,
        stage: Stage,
        model: &str,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<StageOutput, PipelineError> {
        let started = Instant::now();
        let mut errors = Vec::new();

        for attempt in 1..=GENERATION_ATTEMPTS {
            check_cancelled(cancel)?;
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                outcome = self.generator.generate(model, prompt) => outcome,
            };

            match outcome {
                Ok(text) if !text.trim().is_empty() => {
                    debug!(stage = %stage, model, attempt, "stage generated");
                    return Ok(StageOutput {
                        text: text.trim().to_string(),
                        record: StageRecord {
                            stage,
                            model: model.to_string(),
                            attempts: attempt,
                            degraded: false,
                            errors,
                            duration_ms: started.elapsed().as_millis() as u64,
                        },
                    });
                }
                Ok(_) => errors.push("empty response".to_string()),
                Err(e) if e.is_cancelled() => return Err(PipelineError::Cancelled),
                Err(e) => {
                    warn!(stage = %stage, model, attempt, error = %e, error_kind = ?e.kind(), "generation failed");
                    errors.push(e.to_string());
                }
            }
        }

        warn!(stage = %stage, model, "generation failed twice, using fallback text");
        Ok(StageOutput {
            text: FALLBACK_THOUGHT.to_string(),
            record: StageRecord {
                stage,
                model: model.to_string(),
                attempts: GENERATION_ATTEMPTS,
                degraded: true,
                errors,
                duration_ms: started.elapsed().as_millis() as u64,
            },
        })
    }

    /// Append the finished turn. Store failures are logged and traced.
    fn persist(&self, turn: &mut PipelineTurn) {
        let mut records = vec![TurnRecord::new(TurnRole::User, turn.user_input.clone())];
        if self.config.persist_trace {
            records.push(TurnRecord::new(TurnRole::Planner, turn.plan_output.clone()));
            records.push(TurnRecord::new(TurnRole::Critic, turn.critique_output.clone()));
        }
        records.push(TurnRecord::new(TurnRole::Assistant, turn.final_response.clone()));

        for record in records {
            let role = record.role;
            if let Err(e) = self.store.append_turn(record) {
                warn!(role = %role, error = %e, "failed to store turn");
                turn.trace.store_errors.push(format!("{}: {}", role, e));
            }
        }
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use grounded_chat_core::CoreResult;
    use grounded_chat_llm::{LlmError, LlmResult};
    use grounded_chat_retrieval::{
        AttemptContext, RetrievalStrategy, RetryPolicy, StrategyKind,
    };
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Replies `"<model>: ok"`, failing the first `fail_first` calls whose
    /// prompt contains `fail_marker`
    struct ScriptedGenerator {
        fail_marker: Option<&'static str>,
        fail_first: Mutex<usize>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        fn ok() -> Arc<Self> {
            Self::failing(None, 0)
        }

        fn failing(fail_marker: Option<&'static str>, times: usize) -> Arc<Self> {
            Arc::new(Self {
                fail_marker,
                fail_first: Mutex::new(times),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate(&self, model_id: &str, prompt: &str) -> LlmResult<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let targeted = self.fail_marker.map_or(true, |m| prompt.contains(m));
            let mut remaining = self.fail_first.lock().unwrap();
            if targeted && *remaining > 0 {
                *remaining -= 1;
                return Err(LlmError::RateLimited {
                    message: "slow down".to_string(),
                    retry_after: None,
                });
            }
            Ok(format!("{model_id}: ok"))
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        records: Mutex<Vec<TurnRecord>>,
    }

    impl ContextStore for MemoryStore {
        fn append_turn(&self, record: TurnRecord) -> CoreResult<i64> {
            let mut records = self.records.lock().unwrap();
            records.push(record);
            Ok(records.len() as i64)
        }

        fn recent_turns(&self, limit: usize) -> CoreResult<Vec<TurnRecord>> {
            let records = self.records.lock().unwrap();
            let skip = records.len().saturating_sub(limit);
            Ok(records[skip..].to_vec())
        }

        fn pinned_insights(&self) -> CoreResult<Vec<TurnRecord>> {
            Ok(Vec::new())
        }
    }

    struct EchoSearch;

    #[async_trait]
    impl RetrievalStrategy for EchoSearch {
        fn kind(&self) -> StrategyKind {
            StrategyKind::Search
        }

        async fn attempt(&self, request: &RetrievalRequest, _ctx: &AttemptContext) -> RetrievalResult {
            let mut meta = BTreeMap::new();
            meta.insert("query".to_string(), request.raw.clone());
            RetrievalResult::success(StrategyKind::Search, format!("results for {}", request.raw), meta)
        }
    }

    fn pipeline(generator: Arc<ScriptedGenerator>, store: Arc<MemoryStore>) -> Pipeline {
        let coordinator = RetrievalCoordinator::new(RetryPolicy::default()).with_strategy(Arc::new(EchoSearch));
        Pipeline::new(generator, Arc::new(coordinator), store, PipelineConfig::default())
    }

    #[tokio::test]
    async fn test_small_talk_skips_retrieval() {
        let store = Arc::new(MemoryStore::default());
        let turn = pipeline(ScriptedGenerator::ok(), store.clone())
            .run_turn("hello there", &CancellationToken::new())
            .await
            .unwrap();

        assert!(turn.retrieval_results.is_empty());
        assert_eq!(turn.final_response, "gpt-4o-mini: ok");
        assert_eq!(turn.critique_output, "claude-3-5-sonnet-20240620: ok");
        assert_eq!(turn.trace.stages.len(), 3);

        let records = store.records.lock().unwrap();
        let roles: Vec<_> = records.iter().map(|r| r.role).collect();
        assert_eq!(roles, vec![TurnRole::User, TurnRole::Assistant]);
    }

    #[tokio::test]
    async fn test_temporal_question_searches_input() {
        let generator = ScriptedGenerator::ok();
        let turn = pipeline(generator.clone(), Arc::new(MemoryStore::default()))
            .run_turn("What happened in the news today?", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(turn.retrieval_results.len(), 1);
        assert_eq!(turn.retrieval_results[0].meta("query"), Some("What happened in the news today?"));
        let prompts = generator.prompts.lock().unwrap();
        assert!(prompts[1].contains("results for What happened in the news today?"));
    }

    #[tokio::test]
    async fn test_single_failure_is_retried() {
        let turn = pipeline(ScriptedGenerator::failing(None, 1), Arc::new(MemoryStore::default()))
            .run_turn("hello", &CancellationToken::new())
            .await
            .unwrap();

        let plan = turn.trace.stage(Stage::Plan).unwrap();
        assert_eq!(plan.attempts, 2);
        assert!(!plan.degraded);
        assert_eq!(turn.plan_output, "gpt-4o-mini: ok");
    }

    #[tokio::test]
    async fn test_double_failure_degrades_to_fallback() {
        let turn = pipeline(
            ScriptedGenerator::failing(Some("Analyse the latest user message"), 2),
            Arc::new(MemoryStore::default()),
        )
        .run_turn("hello", &CancellationToken::new())
        .await
        .unwrap();

        assert_eq!(turn.plan_output, FALLBACK_THOUGHT);
        assert!(turn.trace.stage(Stage::Plan).unwrap().degraded);
        assert_eq!(turn.final_response, "gpt-4o-mini: ok");
    }

    #[tokio::test]
    async fn test_cancelled_turn_writes_nothing() {
        let store = Arc::new(MemoryStore::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = pipeline(ScriptedGenerator::ok(), store.clone())
            .run_turn("hello", &cancel)
            .await;
        assert_eq!(outcome.unwrap_err(), PipelineError::Cancelled);
        assert!(store.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persist_trace_stores_every_role() {
        let store = Arc::new(MemoryStore::default());
        let config = PipelineConfig {
            persist_trace: true,
            ..Default::default()
        };
        let coordinator = Arc::new(RetrievalCoordinator::new(RetryPolicy::default()));
        Pipeline::new(ScriptedGenerator::ok(), coordinator, store.clone(), config)
            .run_turn("hello", &CancellationToken::new())
            .await
            .unwrap();

        let roles: Vec<_> = store.records.lock().unwrap().iter().map(|r| r.role).collect();
        assert_eq!(
            roles,
            vec![TurnRole::User, TurnRole::Planner, TurnRole::Critic, TurnRole::Assistant]
        );
    }

    #[tokio::test]
    async fn test_history_reaches_prompts() {
        let store = Arc::new(MemoryStore::default());
        store
            .append_turn(TurnRecord::new(TurnRole::User, "my name is Ada"))
            .unwrap();
        let generator = ScriptedGenerator::ok();
        let turn = pipeline(generator.clone(), store)
            .run_turn("hello", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(turn.context_snippets.len(), 1);
        assert!(generator.prompts.lock().unwrap()[0].contains("user: my name is Ada"));
    }
}
