//! Runs a DAG one step at a time, in topological order.

use crate::cache::Cache;
use crate::dag::Dag;
use crate::error::PipelineError;
use crate::result::RunResult;
use crate::runtime::{marshal_input, run_step};
use crate::step::Value;
use flowgraph_core::time::Timestamp;
use flowgraph_core::RunId;
use std::collections::HashMap;
use tracing::instrument;

/// Sequential, single-threaded executor.
#[derive(Debug, Default)]
pub struct SequentialExecutor;

impl SequentialExecutor {
    pub fn new() -> Self {
        Self
    }

    #[instrument(skip(self, dag, cache))]
    pub fn execute(
        &self,
        dag: &Dag,
        initial_input: Option<&Value>,
        cache: Option<&dyn Cache>,
        force: bool,
    ) -> Result<RunResult, PipelineError> {
        let run_id = RunId::new();
        let started_at = Timestamp::now();

        let ordered = dag.sorted_steps()?;
        let mut outputs: HashMap<String, Option<Value>> = HashMap::new();
        let mut results: Vec<(String, crate::result::StepResult)> = Vec::with_capacity(ordered.len());

        for step in ordered {
            let input = marshal_input(step.dependencies(), &outputs, initial_input);
            let result = run_step(step, &input, cache, force);

            match result.status {
                crate::result::StepStatus::Success => {
                    outputs.insert(step.name().to_string(), result.output.clone());
                    results.push((step.name().to_string(), result));
                }
                crate::result::StepStatus::Skipped => {
                    outputs.insert(step.name().to_string(), None);
                    results.push((step.name().to_string(), result));
                }
                crate::result::StepStatus::TimedOut => {
                    let step_name = step.name().to_string();
                    let source = anyhow::Error::from(PipelineError::Timeout {
                        step: step_name.clone(),
                        elapsed_ms: result.duration.as_millis(),
                    });
                    results.push((step_name.clone(), result));
                    return Err(PipelineError::Step {
                        step_name,
                        source,
                        partial: results,
                    });
                }
                crate::result::StepStatus::Failed => {
                    let source = anyhow::anyhow!(
                        result.error.clone().unwrap_or_else(|| "step failed".to_string())
                    );
                    let step_name = step.name().to_string();
                    results.push((step_name.clone(), result));
                    return Err(PipelineError::Step {
                        step_name,
                        source,
                        partial: results,
                    });
                }
            }
        }

        let finished_at = Timestamp::now();
        Ok(RunResult::new(run_id, results, started_at, finished_at))
    }
}
