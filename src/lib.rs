//! Grounded Chat
//!
//! A conversational agent that grounds its replies in content fetched from
//! the web and from code-hosting repositories. It includes:
//! - The orchestration pipeline (classify → plan → critique → synthesize)
//! - The context assembler over the SQLite conversation memory
//! - JSON configuration and environment secrets
//! - Tracing setup for the command-line binary

pub mod models;
pub mod services;
pub mod state;
pub mod storage;
pub mod telemetry;
pub mod utils;

pub use models::settings::AppConfig;
pub use services::pipeline::{Pipeline, PipelineConfig, PipelineError, PipelineTurn};
pub use state::AppState;
pub use utils::error::{AppError, AppResult};
