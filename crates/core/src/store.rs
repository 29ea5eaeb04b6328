//! Conversation Store Boundary
//!
//! The orchestration pipeline reads recent turns and pinned insights from, and
//! appends finished turns to, an external store. Only the shape of the records
//! and the three operations the pipeline needs are defined here; the SQLite
//! implementation lives in the application crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreResult;

/// Who produced a stored turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
    /// Planning-stage output, stored only when trace persistence is enabled
    Planner,
    /// Critique-stage output, stored only when trace persistence is enabled
    Critic,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
            TurnRole::Planner => "planner",
            TurnRole::Critic => "critic",
        }
    }
}

impl std::fmt::Display for TurnRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TurnRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" => Ok(TurnRole::User),
            "assistant" => Ok(TurnRole::Assistant),
            "planner" => Ok(TurnRole::Planner),
            "critic" => Ok(TurnRole::Critic),
            other => Err(format!("Unknown turn role: {}", other)),
        }
    }
}

/// One stored conversation entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    /// Store-assigned key; `None` until appended
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub role: TurnRole,
    pub content: String,
    #[serde(default)]
    pub pinned: bool,
}

impl TurnRecord {
    /// Create an unpinned record stamped with the current time.
    pub fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            id: None,
            timestamp: Utc::now(),
            role,
            content: content.into(),
            pinned: false,
        }
    }

    pub fn pinned(mut self) -> Self {
        self.pinned = true;
        self
    }

    /// Render as a single context line: `timestamp | role: content`.
    pub fn context_line(&self) -> String {
        format!(
            "{} | {}: {}",
            self.timestamp.to_rfc3339(),
            self.role,
            self.content
        )
    }
}

/// Key-ordered append/query store for conversation turns.
///
/// Implementations serialize their own writes; the pipeline only ever reads
/// before it appends within one turn.
pub trait ContextStore: Send + Sync {
    /// Append a record, returning the key it was stored under.
    fn append_turn(&self, record: TurnRecord) -> CoreResult<i64>;

    /// The `limit` most recent records, oldest first.
    fn recent_turns(&self, limit: usize) -> CoreResult<Vec<TurnRecord>>;

    /// Every pinned record, oldest first.
    fn pinned_insights(&self) -> CoreResult<Vec<TurnRecord>>;
}
