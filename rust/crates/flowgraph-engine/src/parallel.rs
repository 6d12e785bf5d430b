//! Runs a DAG level by level, each level executed as a bounded concurrent
//! batch.

use crate::cache::Cache;
use crate::dag::Dag;
use crate::error::PipelineError;
use crate::result::{RunResult, StepResult, StepStatus};
use crate::runtime::{marshal_input, run_step};
use crate::step::{Step, Value};
use flowgraph_core::time::Timestamp;
use flowgraph_core::RunId;
use std::collections::HashMap;
use std::thread;
use tracing::instrument;

/// Level-parallel executor. `max_threads` bounds how many steps within a
/// single level run concurrently; `None` (or `Some(0)`) means unbounded.
#[derive(Debug, Default)]
pub struct ParallelExecutor {
    max_threads: Option<usize>,
}

impl ParallelExecutor {
    pub fn new(max_threads: Option<usize>) -> Self {
        Self { max_threads }
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

        let levels = dag.levels()?;
        let mut outputs: HashMap<String, Option<Value>> = HashMap::new();
        let mut results: Vec<(String, StepResult)> = Vec::new();

        for level in levels {
            let level_results = self.run_level(&level, &outputs, initial_input, cache, force);

            // Materialize outputs for every step in the level before
            // checking for failures, so the only happens-before edge we
            // rely on (every completion in level k precedes every start
            // in level k+1) holds regardless of which step failed.
            for (name, result) in &level_results {
                match result.status {
                    StepStatus::Success => {
                        outputs.insert(name.clone(), result.output.clone());
                    }
                    StepStatus::Skipped => {
                        outputs.insert(name.clone(), None);
                    }
                    StepStatus::Failed | StepStatus::TimedOut => {}
                }
            }

            let first_failure = level_results
                .iter()
                .find(|(_, r)| r.status == StepStatus::Failed || r.status == StepStatus::TimedOut)
                .map(|(n, r)| (n.clone(), r.status, r.error.clone(), r.duration));

            results.extend(level_results);

            if let Some((step_name, status, error, duration)) = first_failure {
                let source = if status == StepStatus::TimedOut {
                    anyhow::Error::from(PipelineError::Timeout {
                        step: step_name.clone(),
                        elapsed_ms: duration.as_millis(),
                    })
                } else {
                    anyhow::anyhow!(error.unwrap_or_else(|| "step failed".to_string()))
                };
                return Err(PipelineError::Step {
                    step_name,
                    source,
                    partial: results,
                });
            }
        }

        let finished_at = Timestamp::now();
        Ok(RunResult::new(run_id, results, started_at, finished_at))
    }

    /// Run every step in a level to completion — a failing step does not
    /// stop its siblings from running, it only stops the *next level*
    /// from starting. Bounded by `max_threads` via sequential chunks
    /// within the level.
    fn run_level(
        &self,
        level: &[&Step],
        outputs: &HashMap<String, Option<Value>>,
        initial_input: Option<&Value>,
        cache: Option<&dyn Cache>,
        force: bool,
    ) -> Vec<(String, StepResult)> {
        let chunk_size = match self.max_threads {
            Some(n) if n > 0 => n,
            _ => level.len().max(1),
        };

        let mut results = Vec::with_capacity(level.len());
        for chunk in level.chunks(chunk_size) {
            thread::scope(|scope| {
                let handles: Vec<_> = chunk
                    .iter()
                    .map(|step| {
                        let input = marshal_input(step.dependencies(), outputs, initial_input);
                        scope.spawn(move || {
                            let result = run_step(step, &input, cache, force);
                            (step.name().to_string(), result)
                        })
                    })
                    .collect();

                for handle in handles {
                    results.push(handle.join().expect("step worker thread panicked"));
                }
            });
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepBuilder;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn diamond_runs_path_a_and_b_in_same_level() {
        let mut dag = Dag::new();
        dag.add(StepBuilder::new("source").callable(|_| Ok(serde_json::json!(10))).build())
            .unwrap();
        dag.add(
            StepBuilder::new("path_a")
                .depends_on_one("source")
                .callable(|input| Ok(serde_json::json!(input.as_one().unwrap().as_i64().unwrap() + 1)))
                .build(),
        )
        .unwrap();
        dag.add(
            StepBuilder::new("path_b")
                .depends_on_one("source")
                .callable(|input| Ok(serde_json::json!(input.as_one().unwrap().as_i64().unwrap() + 2)))
                .build(),
        )
        .unwrap();
        dag.add(
            StepBuilder::new("merge")
                .depends_on(["path_a", "path_b"])
                .callable(|input| {
                    let map = input.as_many().unwrap();
                    Ok(serde_json::json!(map["path_a"].as_i64().unwrap() + map["path_b"].as_i64().unwrap()))
                })
                .build(),
        )
        .unwrap();

        assert_eq!(dag.levels().unwrap()[1].len(), 2);

        let executor = ParallelExecutor::new(None);
        let result = executor.execute(&dag, None, None, false).unwrap();
        assert_eq!(result.get("merge").unwrap().output, Some(serde_json::json!(23)));
    }

    #[test]
    fn level_barrier_blocks_next_level_until_whole_level_done() {
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_concurrent = Arc::new(AtomicUsize::new(0));

        let mut dag = Dag::new();
        dag.add(StepBuilder::new("init").callable(|_| Ok(serde_json::json!(null))).build())
            .unwrap();
        for name in ["a", "b", "c"] {
            let concurrent = Arc::clone(&concurrent);
            let max_concurrent = Arc::clone(&max_concurrent);
            dag.add(
                StepBuilder::new(name)
                    .depends_on_one("init")
                    .callable(move |_| {
                        let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                        max_concurrent.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(std::time::Duration::from_millis(20));
                        concurrent.fetch_sub(1, Ordering::SeqCst);
                        Ok(serde_json::json!(null))
                    })
                    .build(),
            )
            .unwrap();
        }
        dag.add(StepBuilder::new("final").depends_on(["a", "b", "c"]).callable(|_| Ok(serde_json::json!("done"))).build())
            .unwrap();

        let executor = ParallelExecutor::new(None);
        let result = executor.execute(&dag, None, None, false).unwrap();
        assert!(result.is_success());
        assert!(max_concurrent.load(Ordering::SeqCst) >= 2, "a/b/c should overlap");
        assert!(result.get("init").unwrap().finished_at <= result.get("a").unwrap().started_at);
    }

    #[test]
    fn sibling_failure_drains_level_then_aborts() {
        let ran_sibling = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ran_sibling_clone = Arc::clone(&ran_sibling);

        let mut dag = Dag::new();
        dag.add(StepBuilder::new("init").callable(|_| Ok(serde_json::json!(null))).build())
            .unwrap();
        dag.add(
            StepBuilder::new("failing")
                .depends_on_one("init")
                .callable(|_| anyhow::bail!("boom"))
                .build(),
        )
        .unwrap();
        dag.add(
            StepBuilder::new("sibling")
                .depends_on_one("init")
                .callable(move |_| {
                    thread::sleep(std::time::Duration::from_millis(10));
                    ran_sibling_clone.store(true, Ordering::SeqCst);
                    Ok(serde_json::json!("ok"))
                })
                .build(),
        )
        .unwrap();
        dag.add(StepBuilder::new("unreached").depends_on(["failing", "sibling"]).callable(|_| Ok(serde_json::json!(1))).build())
            .unwrap();

        let executor = ParallelExecutor::new(None);
        let err = executor.execute(&dag, None, None, false).unwrap_err();
        match err {
            PipelineError::Step { step_name, partial, .. } => {
                assert_eq!(step_name, "failing");
                assert!(partial.iter().any(|(n, _)| n == "sibling"));
                assert!(!partial.iter().any(|(n, _)| n == "unreached"));
            }
            other => panic!("expected Step error, got {other:?}"),
        }
        assert!(ran_sibling.load(Ordering::SeqCst), "sibling should drain to completion");
    }

    #[test]
    fn max_threads_bounds_concurrency() {
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_concurrent = Arc::new(AtomicUsize::new(0));

        let mut dag = Dag::new();
        for i in 0..4 {
            let concurrent = Arc::clone(&concurrent);
            let max_concurrent = Arc::clone(&max_concurrent);
            dag.add(
                StepBuilder::new(format!("step{i}"))
                    .callable(move |_| {
                        let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                        max_concurrent.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(std::time::Duration::from_millis(15));
                        concurrent.fetch_sub(1, Ordering::SeqCst);
                        Ok(serde_json::json!(null))
                    })
                    .build(),
            )
            .unwrap();
        }

        let executor = ParallelExecutor::new(Some(2));
        executor.execute(&dag, None, None, false).unwrap();
        assert!(max_concurrent.load(Ordering::SeqCst) <= 2);
    }
}
