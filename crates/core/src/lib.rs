//! Grounded Chat Core
//!
//! Foundational types for the Grounded Chat workspace. This crate has no
//! dependencies on network clients, language-model providers, or the database.
//!
//! ## Module Organization
//!
//! - `error` - Core error types (`CoreError`, `CoreResult`)
//! - `proxy` - Proxy configuration data types shared by every HTTP-using crate
//! - `store` - Conversation store boundary (`TurnRecord`, `TurnRole`, `ContextStore`)
//!
//! ## Design Principles
//!
//! 1. **Minimal dependencies (serde/thiserror/chrono)** - keeps build times low
//! 2. **Trait-based boundaries** - storage is consumed through a trait so tests can substitute doubles
//! 3. **Unidirectional dependency** - this crate depends on nothing else in the workspace

pub mod error;
pub mod proxy;
pub mod store;

// ── Error Types ────────────────────────────────────────────────────────
pub use error::{CoreError, CoreResult};

// ── Proxy Types ────────────────────────────────────────────────────────
pub use proxy::{ProxyConfig, ProxyProtocol};

// ── Conversation Store ─────────────────────────────────────────────────
pub use store::{ContextStore, TurnRecord, TurnRole};
