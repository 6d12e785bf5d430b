//! Error taxonomy surfaced to callers.

use crate::result::StepResult;

/// Step results collected so far, in the order steps were attempted.
pub type PartialResults = Vec<(String, StepResult)>;

/// Errors the engine can raise. `DuplicateStep`, `MissingDependency` and
/// `Cycle` abort definition/validation before any callable runs; `Timeout`
/// and `Step` are raised mid-run and carry whatever partial results were
/// collected before the failure.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("duplicate step: '{0}'")]
    DuplicateStep(String),

    #[error("step '{step}' depends on unknown step '{dependency}'")]
    MissingDependency { step: String, dependency: String },

    #[error("cycle detected in DAG, involving step '{0}'")]
    Cycle(String),

    #[error("step '{step}' exceeded its timeout after {elapsed_ms}ms")]
    Timeout { step: String, elapsed_ms: u64 },

    #[error("step '{step_name}' failed: {source}")]
    Step {
        step_name: String,
        #[source]
        source: anyhow::Error,
        partial: PartialResults,
    },

    #[error("invalid cache configuration: {0}")]
    InvalidCache(String),
}

impl PipelineError {
    /// The partial results collected before this error was raised, if any.
    pub fn partial_results(&self) -> Option<&PartialResults> {
        match self {
            PipelineError::Step { partial, .. } => Some(partial),
            _ => None,
        }
    }
}
