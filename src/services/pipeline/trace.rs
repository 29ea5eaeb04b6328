//! Turn state and its internal trace.

use chrono::{DateTime, Utc};
use grounded_chat_retrieval::{AttemptLog, RetrievalResult};
use serde::{Deserialize, Serialize};

use super::classify::Classification;

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Classify,
    Plan,
    Critique,
    Synthesize,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Classify => write!(f, "classify"),
            Stage::Plan => write!(f, "plan"),
            Stage::Critique => write!(f, "critique"),
            Stage::Synthesize => write!(f, "synthesize"),
        }
    }
}

/// Record of one generation stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub model: String,
    /// Generation calls made, 1 or 2
    pub attempts: u32,
    /// The stage emitted the fallback text
    pub degraded: bool,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

/// Everything that happened inside one turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnTrace {
    pub turn_id: String,
    pub started_at: DateTime<Utc>,
    pub classification: Classification,
    pub stages: Vec<StageRecord>,
    /// One attempt log per retrieval request, same order as the results
    pub retrievals: Vec<AttemptLog>,
    /// Retrieval ran out of its per-turn budget
    pub retrieval_budget_exhausted: bool,
    /// Store writes that failed; the turn still completes
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub store_errors: Vec<String>,
    pub total_duration_ms: u64,
}

impl TurnTrace {
    pub fn new() -> Self {
        Self {
            turn_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            classification: Classification::default(),
            stages: Vec::new(),
            retrievals: Vec::new(),
            retrieval_budget_exhausted: false,
            store_errors: Vec::new(),
            total_duration_ms: 0,
        }
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageRecord> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// Whether any stage or retrieval degraded
    pub fn is_degraded(&self) -> bool {
        self.stages.iter().any(|s| s.degraded)
            || self.retrieval_budget_exhausted
            || self
                .retrievals
                .iter()
                .any(|log| log.successful_strategy.is_none())
    }
}

impl Default for TurnTrace {
    fn default() -> Self {
        Self::new()
    }
}

/// State of one turn, built up stage by stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineTurn {
    pub user_input: String,
    pub context_snippets: Vec<String>,
    pub plan_output: String,
    pub critique_output: String,
    /// Non-empty only when the turn warranted retrieval
    pub retrieval_results: Vec<RetrievalResult>,
    pub final_response: String,
    pub trace: TurnTrace,
}

impl PipelineTurn {
    pub fn new(user_input: impl Into<String>) -> Self {
        Self {
            user_input: user_input.into(),
            context_snippets: Vec::new(),
            plan_output: String::new(),
            critique_output: String::new(),
            retrieval_results: Vec::new(),
            final_response: String::new(),
            trace: TurnTrace::new(),
        }
    }

    pub fn grounded(&self) -> bool {
        self.retrieval_results.iter().any(|r| r.success)
    }
}
