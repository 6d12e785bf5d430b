//! The `Pipeline` facade: binds a DAG to an executor selection and a
//! cache resolution.

use crate::cache::{Cache, FileStore, MemoryStore};
use crate::dag::Dag;
use crate::error::PipelineError;
use crate::parallel::ParallelExecutor;
use crate::result::RunResult;
use crate::sequential::SequentialExecutor;
use crate::step::{Step, Value};
use flowgraph_core::EngineConfig;
use std::path::PathBuf;
use std::sync::Arc;

/// Common interface both built-in executors implement, so a caller can
/// also supply their own.
pub trait Executor: Send + Sync {
    fn execute(
        &self,
        dag: &Dag,
        initial_input: Option<&Value>,
        cache: Option<&dyn Cache>,
        force: bool,
    ) -> Result<RunResult, PipelineError>;
}

impl Executor for SequentialExecutor {
    fn execute(
        &self,
        dag: &Dag,
        initial_input: Option<&Value>,
        cache: Option<&dyn Cache>,
        force: bool,
    ) -> Result<RunResult, PipelineError> {
        SequentialExecutor::execute(self, dag, initial_input, cache, force)
    }
}

impl Executor for ParallelExecutor {
    fn execute(
        &self,
        dag: &Dag,
        initial_input: Option<&Value>,
        cache: Option<&dyn Cache>,
        force: bool,
    ) -> Result<RunResult, PipelineError> {
        ParallelExecutor::execute(self, dag, initial_input, cache, force)
    }
}

/// Which executor a run should use.
pub enum ExecutorChoice {
    Sequential,
    Parallel,
    Custom(Arc<dyn Executor>),
}

impl Default for ExecutorChoice {
    fn default() -> Self {
        ExecutorChoice::Sequential
    }
}

/// Where a run's cache should be resolved from.
pub enum CacheSpec {
    None,
    Path(PathBuf),
    Custom(Arc<dyn Cache>),
}

impl Default for CacheSpec {
    fn default() -> Self {
        CacheSpec::None
    }
}

/// Per-run options, standing in for a keyword-argument call shape
/// (`initial_input:`, `executor:`, `max_threads:`, `cache:`, `force:`).
///
/// `max_threads` and `cache` are `None`/unset by default, not "explicitly
/// disabled" — an unset value falls back to the ambient [`EngineConfig`]
/// a [`Pipeline`] loads at construction. Pass `CacheSpec::None` explicitly
/// via [`RunOptions::cache`] to opt out of caching even when the ambient
/// config names a cache directory.
#[derive(Default)]
pub struct RunOptions {
    initial_input: Option<Value>,
    executor: ExecutorChoice,
    max_threads: Option<usize>,
    cache: Option<CacheSpec>,
    force: bool,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initial_input(mut self, value: Value) -> Self {
        self.initial_input = Some(value);
        self
    }

    pub fn executor(mut self, choice: ExecutorChoice) -> Self {
        self.executor = choice;
        self
    }

    /// Only consulted when `executor` resolves to the parallel tag. Unset
    /// falls back to the ambient config's `default_max_threads`.
    pub fn max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = Some(max_threads);
        self
    }

    /// Unset falls back to a `FileStore` rooted at the ambient config's
    /// `cache_dir`. Pass `CacheSpec::None` explicitly to run without a
    /// cache regardless of ambient config.
    pub fn cache(mut self, cache: CacheSpec) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// Binds a validated [`Dag`] to a default executor selection and the
/// ambient engine defaults a run falls back to when `RunOptions` leaves
/// `cache`/`max_threads` unset.
pub struct Pipeline {
    dag: Dag,
    config: EngineConfig,
}

impl Pipeline {
    fn new(dag: Dag) -> Result<Self, PipelineError> {
        dag.validate()?;
        let config = EngineConfig::load().unwrap_or_default();
        Ok(Self { dag, config })
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        self.dag.validate()
    }

    pub fn to_mermaid(&self) -> String {
        self.dag.to_mermaid()
    }

    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.dag.steps()
    }

    pub fn len(&self) -> usize {
        self.dag.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dag.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Step> {
        self.dag.get(name)
    }

    /// Execute the pipeline under the chosen executor and cache.
    ///
    /// A `RunOptions` that leaves `cache`/`max_threads` unset falls back to
    /// this pipeline's ambient [`EngineConfig`] (`cache_dir`,
    /// `default_max_threads`); an explicit value always wins.
    pub fn run(&self, options: RunOptions) -> Result<RunResult, PipelineError> {
        let cache_spec = options
            .cache
            .unwrap_or_else(|| CacheSpec::Path(PathBuf::from(self.config.cache_dir.as_str())));
        let cache: Option<Arc<dyn Cache>> = match cache_spec {
            CacheSpec::None => None,
            CacheSpec::Path(path) => {
                let store = FileStore::new(path.clone())
                    .map_err(|e| PipelineError::InvalidCache(format!("{}: {e}", path.display())))?;
                Some(Arc::new(store))
            }
            CacheSpec::Custom(cache) => Some(cache),
        };
        let cache_ref = cache.as_deref();

        let max_threads = resolve_max_threads(options.max_threads, self.config.default_max_threads);

        match options.executor {
            ExecutorChoice::Sequential => {
                SequentialExecutor::new().execute(&self.dag, options.initial_input.as_ref(), cache_ref, options.force)
            }
            ExecutorChoice::Parallel => {
                ParallelExecutor::new(max_threads).execute(
                    &self.dag,
                    options.initial_input.as_ref(),
                    cache_ref,
                    options.force,
                )
            }
            ExecutorChoice::Custom(executor) => {
                executor.execute(&self.dag, options.initial_input.as_ref(), cache_ref, options.force)
            }
        }
    }
}

impl std::ops::Index<&str> for Pipeline {
    type Output = Step;

    fn index(&self, name: &str) -> &Step {
        self.dag
            .get(name)
            .unwrap_or_else(|| panic!("no such step: '{name}'"))
    }
}

/// A handle passed to the `define` builder closure, giving the closure
/// an explicit receiver to register steps on rather than relying on an
/// implicit-receiver DSL.
pub struct PipelineBuilder {
    dag: Dag,
    error: Option<PipelineError>,
}

impl PipelineBuilder {
    fn new() -> Self {
        Self {
            dag: Dag::new(),
            error: None,
        }
    }

    /// Register a step, built via [`crate::StepBuilder`]. The first
    /// `DuplicateStep` error encountered is remembered and surfaced once
    /// the builder closure returns.
    pub fn step(&mut self, step: Step) -> &mut Self {
        if self.error.is_none() {
            if let Err(e) = self.dag.add(step) {
                self.error = Some(e);
            }
        }
        self
    }
}

/// Build and validate a [`Pipeline`] from a builder closure.
pub fn define<F>(f: F) -> Result<Pipeline, PipelineError>
where
    F: FnOnce(&mut PipelineBuilder),
{
    let mut builder = PipelineBuilder::new();
    f(&mut builder);
    if let Some(err) = builder.error {
        return Err(err);
    }
    Pipeline::new(builder.dag)
}

/// Convenience constructor for an in-memory cache, since `MemoryStore`
/// needs no path.
pub fn memory_cache() -> CacheSpec {
    CacheSpec::Custom(Arc::new(MemoryStore::new()))
}

/// Resolve the parallel executor's thread bound: an explicit value always
/// wins; otherwise fall back to the ambient default, where `0` means
/// unbounded.
fn resolve_max_threads(explicit: Option<usize>, ambient_default: usize) -> Option<usize> {
    explicit.or(match ambient_default {
        0 => None,
        n => Some(n),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepBuilder;

    fn two_step_pipeline() -> Pipeline {
        define(|b| {
            b.step(StepBuilder::new("first").callable(|_| Ok(serde_json::json!("r1"))).build());
        })
        .unwrap()
    }

    #[test]
    fn define_validates_eagerly() {
        let err = define(|b| {
            b.step(StepBuilder::new("a").depends_on_one("missing").callable(|_| Ok(Value::Null)).build());
        })
        .unwrap_err();
        assert!(matches!(err, PipelineError::MissingDependency { .. }));
    }

    #[test]
    fn duplicate_step_surfaces_from_define() {
        let err = define(|b| {
            b.step(StepBuilder::new("a").callable(|_| Ok(Value::Null)).build());
            b.step(StepBuilder::new("a").callable(|_| Ok(Value::Null)).build());
        })
        .unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateStep(_)));
    }

    #[test]
    fn run_defaults_to_sequential() {
        let pipeline = two_step_pipeline();
        // `cache` is left unset deliberately here, which would otherwise
        // fall back to the ambient config's on-disk `cache_dir` — pin it
        // to `None` so this test stays about executor selection only.
        let result = pipeline.run(RunOptions::new().cache(CacheSpec::None)).unwrap();
        assert_eq!(result.get("first").unwrap().output, Some(serde_json::json!("r1")));
    }

    #[test]
    fn unset_cache_falls_back_to_ambient_cache_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = two_step_pipeline();
        pipeline.config.cache_dir = dir.path().to_string_lossy().into_owned();

        pipeline.run(RunOptions::new()).unwrap();

        let wrote_a_file = std::fs::read_dir(dir.path()).unwrap().next().is_some();
        assert!(wrote_a_file, "unset cache should have used the ambient cache_dir");
    }

    #[test]
    fn explicit_none_cache_overrides_ambient_cache_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = two_step_pipeline();
        pipeline.config.cache_dir = dir.path().to_string_lossy().into_owned();

        pipeline.run(RunOptions::new().cache(CacheSpec::None)).unwrap();

        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn resolve_max_threads_prefers_explicit_over_ambient() {
        assert_eq!(resolve_max_threads(Some(4), 8), Some(4));
        assert_eq!(resolve_max_threads(None, 8), Some(8));
        assert_eq!(resolve_max_threads(None, 0), None, "ambient 0 means unbounded");
    }

    #[test]
    fn resume_after_failure_s8() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc as StdArc;

        let first_calls = StdArc::new(AtomicU32::new(0));
        let second_calls = StdArc::new(AtomicU32::new(0));
        let first_calls_clone = StdArc::clone(&first_calls);
        let second_calls_clone = StdArc::clone(&second_calls);

        let pipeline = define(move |b| {
            let first_calls = StdArc::clone(&first_calls_clone);
            b.step(
                StepBuilder::new("first")
                    .callable(move |_| {
                        first_calls.fetch_add(1, Ordering::SeqCst);
                        Ok(serde_json::json!("r1"))
                    })
                    .build(),
            );
            let second_calls = StdArc::clone(&second_calls_clone);
            b.step(
                StepBuilder::new("second")
                    .depends_on_one("first")
                    .callable(move |_| {
                        let n = second_calls.fetch_add(1, Ordering::SeqCst);
                        if n == 0 {
                            anyhow::bail!("first call fails")
                        } else {
                            Ok(serde_json::json!("r2"))
                        }
                    })
                    .build(),
            );
        })
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().to_path_buf();

        let err = pipeline
            .run(RunOptions::new().cache(CacheSpec::Path(cache_path.clone())))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Step { .. }));
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);

        let result = pipeline
            .run(RunOptions::new().cache(CacheSpec::Path(cache_path)))
            .unwrap();
        assert!(result.is_success());
        assert_eq!(result.get("second").unwrap().output, Some(serde_json::json!("r2")));
        assert_eq!(first_calls.load(Ordering::SeqCst), 1, "first must not run again — its output was cached");
    }

    #[test]
    fn mermaid_via_pipeline() {
        let pipeline = two_step_pipeline();
        assert!(pipeline.to_mermaid().starts_with("graph TD\n"));
    }
}
