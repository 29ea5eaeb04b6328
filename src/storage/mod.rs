//! Storage Layer
//!
//! Handles all data persistence: SQLite conversation memory, environment
//! secrets, and JSON config.

pub mod config;
pub mod database;
pub mod secrets;

pub use config::*;
pub use database::*;
pub use secrets::*;
