//! Flowgraph dataflow engine.
//!
//! A small library for declaring named computational steps linked by
//! dependencies, validating the resulting graph, and executing it with
//! correct ordering, concurrency, retry, timeout, conditional skipping,
//! and durable result caching.
//!
//! ```
//! use flowgraph_engine::{define, CacheSpec, StepBuilder, RunOptions};
//!
//! let pipeline = define(|b| {
//!     b.step(StepBuilder::new("fetch").callable(|_| Ok(serde_json::json!([1, 2, 3]))).build());
//!     b.step(
//!         StepBuilder::new("sum")
//!             .depends_on_one("fetch")
//!             .callable(|input| {
//!                 let total: i64 = input.as_one().unwrap().as_array().unwrap()
//!                     .iter().map(|v| v.as_i64().unwrap()).sum();
//!                 Ok(serde_json::json!(total))
//!             })
//!             .build(),
//!     );
//! }).unwrap();
//!
//! // `cache(CacheSpec::None)` opts out of the ambient on-disk cache a
//! // bare `RunOptions::new()` would otherwise fall back to.
//! let result = pipeline.run(RunOptions::new().cache(CacheSpec::None)).unwrap();
//! assert_eq!(result.get("sum").unwrap().output, Some(serde_json::json!(6)));
//! ```

pub mod cache;
pub mod dag;
pub mod error;
pub mod parallel;
pub mod pipeline;
pub mod result;
pub mod runtime;
pub mod sequential;
pub mod step;

pub use cache::{Cache, CachedResult, CachedStatus, FileStore, MemoryStore};
pub use dag::Dag;
pub use error::{PartialResults, PipelineError};
pub use parallel::ParallelExecutor;
pub use pipeline::{define, memory_cache, CacheSpec, Executor, ExecutorChoice, Pipeline, PipelineBuilder, RunOptions};
pub use result::{RunResult, StepResult, StepStatus};
pub use sequential::SequentialExecutor;
pub use step::{CacheKeyFn, Callable, Predicate, RetryBackoff, RetryPredicate, Step, StepBuilder, StepInput, StepOptions, Value};
