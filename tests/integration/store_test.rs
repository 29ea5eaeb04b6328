//! Conversation Memory Integration Tests
//!
//! SQLite-backed store driven through the pipeline and the context assembler.

use std::sync::Arc;

use grounded_chat::services::context::{ContextAssembler, PINNED_PREFIX};
use grounded_chat::services::pipeline::{Pipeline, PipelineConfig};
use grounded_chat::storage::database::Database;
use grounded_chat_core::{ContextStore, TurnRecord, TurnRole};
use grounded_chat_retrieval::{RetrievalCoordinator, RetryPolicy};
use tokio_util::sync::CancellationToken;

use crate::support::MarkerGenerator;

#[tokio::test]
async fn test_turns_survive_reopen_and_feed_context() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memory.db");

    {
        let db = Arc::new(Database::open(&path).unwrap());
        let pipeline = Pipeline::new(
            MarkerGenerator::new(vec![]),
            Arc::new(RetrievalCoordinator::new(RetryPolicy::default())),
            db.clone(),
            PipelineConfig::default(),
        );
        pipeline
            .run_turn("Remember that my build uses sprocket 7", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(db.count_turns().unwrap(), 2);
        assert!(db.pin_latest().unwrap().is_some());
    }

    let db = Arc::new(Database::open(&path).unwrap());
    let pinned = db.pinned_insights().unwrap();
    assert_eq!(pinned.len(), 1);
    assert_eq!(pinned[0].role, TurnRole::Assistant);

    db.append_turn(TurnRecord::new(TurnRole::User, "and what about sprocket 8?"))
        .unwrap();
    let snippets = ContextAssembler::new(db.clone(), 8).assemble().unwrap();

    // Pinned reply first, then the unpinned history without repeating it
    assert_eq!(snippets.len(), 3);
    assert!(snippets[0].starts_with(PINNED_PREFIX));
    assert!(snippets[0].contains("assistant: "));
    assert!(snippets[1].contains("user: Remember that my build uses sprocket 7"));
    assert!(snippets[2].contains("user: and what about sprocket 8?"));
}

#[test]
fn test_recent_window_keeps_newest_in_order() {
    let db = Arc::new(Database::new_in_memory().unwrap());
    for i in 0..6 {
        db.append_turn(TurnRecord::new(TurnRole::User, format!("message {}", i)))
            .unwrap();
    }

    let snippets = ContextAssembler::new(db, 3).assemble().unwrap();

    assert_eq!(snippets.len(), 3);
    assert!(snippets[0].ends_with("user: message 3"));
    assert!(snippets[2].ends_with("user: message 5"));
}

#[test]
fn test_pin_latest_with_no_replies() {
    let db = Database::new_in_memory().unwrap();
    assert_eq!(db.pin_latest().unwrap(), None);

    db.append_turn(TurnRecord::new(TurnRole::User, "hi")).unwrap();
    assert_eq!(db.pin_latest().unwrap(), None);
    assert!(db.pinned_insights().unwrap().is_empty());
}
