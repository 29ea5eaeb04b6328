//! Integration Tests Module
//!
//! Exercises the retrieval coordinator against a loopback HTTP server, the
//! orchestration pipeline end to end with failing test doubles, and the
//! SQLite conversation store behind the context assembler.

// Shared loopback server and test doubles
mod support;

// Retrieval coordinator, strategies and fallbacks
mod retrieval_test;

// Four-stage pipeline degradation and cancellation
mod pipeline_test;

// Conversation memory and context assembly
mod store_test;
