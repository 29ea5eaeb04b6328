//! Services
//!
//! Business logic: context assembly, the orchestration pipeline, and the
//! wiring that builds its collaborators from configuration.

pub mod context;
pub mod pipeline;
pub mod retrieval;

pub use context::ContextAssembler;
pub use pipeline::{
    Classification, HeuristicClassifier, Pipeline, PipelineConfig, PipelineError, PipelineTurn,
    RetrievalClassifier, Stage, FALLBACK_THOUGHT,
};
pub use retrieval::{build_coordinator, build_generator};
