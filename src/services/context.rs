//! Context Assembler
//!
//! Pulls pinned insights and recent turns from the conversation store and
//! formats them as prompt snippets.

use std::collections::HashSet;
use std::sync::Arc;

use grounded_chat_core::{ContextStore, CoreResult};

/// Prefix marking a pinned snippet
pub const PINNED_PREFIX: &str = "[pinned] ";

pub struct ContextAssembler {
    store: Arc<dyn ContextStore>,
    recent_limit: usize,
}

impl ContextAssembler {
    pub fn new(store: Arc<dyn ContextStore>, recent_limit: usize) -> Self {
        Self {
            store,
            recent_limit,
        }
    }

    pub fn recent_limit(&self) -> usize {
        self.recent_limit
    }

    /// Pinned insights first, then up to `recent_limit` recent turns, oldest
    /// first. A pinned record that is also recent appears only once.
    pub fn assemble(&self) -> CoreResult<Vec<String>> {
        let pinned = self.store.pinned_insights()?;
        let recent = if self.recent_limit == 0 {
            Vec::new()
        } else {
            self.store.recent_turns(self.recent_limit)?
        };

        let pinned_ids: HashSet<i64> = pinned.iter().filter_map(|r| r.id).collect();
        let mut snippets = Vec::with_capacity(pinned.len() + recent.len());
        snippets.extend(
            pinned
                .iter()
                .map(|r| format!("{}{}", PINNED_PREFIX, r.context_line())),
        );
        snippets.extend(
            recent
                .iter()
                .filter(|r| r.id.map_or(true, |id| !pinned_ids.contains(&id)))
                .map(|r| r.context_line()),
        );
        Ok(snippets)
    }
}
