//! Step definitions.

use std::collections::BTreeMap;
use std::sync::Arc;

/// The dynamically-typed value carried between steps.
pub type Value = serde_json::Value;

/// The shape of input an executor hands to a step's callable, predicates,
/// and cache-key function alike. Built from the dependency count so no
/// callable ever has to dispatch on arity itself.
#[derive(Debug, Clone, Default)]
pub enum StepInput {
    /// Zero dependencies and no `initial_input` supplied for the run.
    #[default]
    None,
    /// Zero dependencies with an `initial_input`, or exactly one
    /// dependency.
    One(Value),
    /// More than one dependency. A dependency whose step was skipped
    /// contributes `Value::Null` for its key.
    Many(BTreeMap<String, Value>),
}

impl StepInput {
    /// `true` for any non-`None` variant; used by callables that want to
    /// check whether upstream produced anything before reading it.
    pub fn is_present(&self) -> bool {
        !matches!(self, StepInput::None)
    }

    /// The single value this input wraps, if it is the `One` variant.
    pub fn as_one(&self) -> Option<&Value> {
        match self {
            StepInput::One(v) => Some(v),
            _ => None,
        }
    }

    /// The keyword map this input wraps, if it is the `Many` variant.
    pub fn as_many(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            StepInput::Many(m) => Some(m),
            _ => None,
        }
    }
}

/// A step's callable: takes the marshalled input, returns the step's
/// output or an opaque failure.
pub type Callable = Arc<dyn Fn(&StepInput) -> anyhow::Result<Value> + Send + Sync>;

/// A predicate evaluated against a step's input (`if`, `unless`).
pub type Predicate = Arc<dyn Fn(&StepInput) -> bool + Send + Sync>;

/// A predicate evaluated against a callable failure to decide whether it
/// is worth retrying (`retry_if`).
pub type RetryPredicate = Arc<dyn Fn(&anyhow::Error) -> bool + Send + Sync>;

/// A function computing a cache key from a step's input (`cache_key`).
pub type CacheKeyFn = Arc<dyn Fn(&StepInput) -> String + Send + Sync>;

/// Backoff schedule between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryBackoff {
    /// Constant delay `D` before every retry.
    #[default]
    None,
    /// `D * k` before the k-th retry.
    Linear,
    /// `D * 2^(k-1)` before the k-th retry.
    Exponential,
}

impl RetryBackoff {
    /// Delay in milliseconds before the k-th retry (k starting at 1),
    /// given a base delay `d_ms`.
    pub fn delay_ms(&self, d_ms: u64, k: u32) -> u64 {
        match self {
            RetryBackoff::None => d_ms,
            RetryBackoff::Linear => d_ms.saturating_mul(k as u64),
            RetryBackoff::Exponential => d_ms.saturating_mul(1u64 << (k.saturating_sub(1))),
        }
    }
}

/// Recognized per-step options.
#[derive(Clone)]
pub struct StepOptions {
    pub timeout: Option<std::time::Duration>,
    pub retries: u32,
    pub retry_delay: std::time::Duration,
    pub retry_backoff: RetryBackoff,
    pub retry_if: Option<RetryPredicate>,
    pub if_cond: Option<Predicate>,
    pub unless: Option<Predicate>,
    pub cache: bool,
    pub cache_key: Option<CacheKeyFn>,
}

impl std::fmt::Debug for StepOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepOptions")
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("retry_delay", &self.retry_delay)
            .field("retry_backoff", &self.retry_backoff)
            .field("retry_if", &self.retry_if.is_some())
            .field("if_cond", &self.if_cond.is_some())
            .field("unless", &self.unless.is_some())
            .field("cache", &self.cache)
            .field("cache_key", &self.cache_key.is_some())
            .finish()
    }
}

impl Default for StepOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            retries: 0,
            retry_delay: std::time::Duration::ZERO,
            retry_backoff: RetryBackoff::None,
            retry_if: None,
            if_cond: None,
            unless: None,
            cache: true,
            cache_key: None,
        }
    }
}

/// An immutable, named unit of computation with declared dependencies.
///
/// Constructed via [`StepBuilder`] and frozen once added to a [`crate::Dag`].
#[derive(Clone)]
pub struct Step {
    name: String,
    dependencies: Vec<String>,
    callable: Callable,
    options: StepOptions,
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("options", &self.options)
            .finish()
    }
}

impl Step {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn options(&self) -> &StepOptions {
        &self.options
    }

    /// Invoke the step's callable directly (bypassing retry/timeout/cache
    /// — those live in the executor runtime).
    pub fn call(&self, input: &StepInput) -> anyhow::Result<Value> {
        (*self.callable)(input)
    }

    /// A cheap clone of the callable handle, used by the executor runtime
    /// to move it onto a timeout-enforcement thread.
    pub(crate) fn callable_handle(&self) -> Callable {
        Arc::clone(&self.callable)
    }
}

/// Builder for a [`Step`], made explicit as a Rust builder instead of an
/// implicit-receiver DSL.
pub struct StepBuilder {
    name: String,
    dependencies: Vec<String>,
    callable: Option<Callable>,
    options: StepOptions,
}

impl StepBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            callable: None,
            options: StepOptions::default(),
        }
    }

    /// Declare dependencies, order preserved, duplicates preserved
    /// positionally.
    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn depends_on_one(mut self, dep: impl Into<String>) -> Self {
        self.dependencies = vec![dep.into()];
        self
    }

    pub fn callable<F>(mut self, f: F) -> Self
    where
        F: Fn(&StepInput) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.callable = Some(Arc::new(f));
        self
    }

    pub fn timeout(mut self, timeout: std::time::Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.options.retries = retries;
        self
    }

    pub fn retry_delay(mut self, delay: std::time::Duration) -> Self {
        self.options.retry_delay = delay;
        self
    }

    pub fn retry_backoff(mut self, backoff: RetryBackoff) -> Self {
        self.options.retry_backoff = backoff;
        self
    }

    pub fn retry_if<F>(mut self, f: F) -> Self
    where
        F: Fn(&anyhow::Error) -> bool + Send + Sync + 'static,
    {
        self.options.retry_if = Some(Arc::new(f));
        self
    }

    pub fn if_cond<F>(mut self, f: F) -> Self
    where
        F: Fn(&StepInput) -> bool + Send + Sync + 'static,
    {
        self.options.if_cond = Some(Arc::new(f));
        self
    }

    pub fn unless<F>(mut self, f: F) -> Self
    where
        F: Fn(&StepInput) -> bool + Send + Sync + 'static,
    {
        self.options.unless = Some(Arc::new(f));
        self
    }

    pub fn cache(mut self, enabled: bool) -> Self {
        self.options.cache = enabled;
        self
    }

    pub fn cache_key<F>(mut self, f: F) -> Self
    where
        F: Fn(&StepInput) -> String + Send + Sync + 'static,
    {
        self.options.cache_key = Some(Arc::new(f));
        self
    }

    /// Finish building. Fails loudly (via `expect`) if no callable was
    /// ever supplied — a step with nothing to run is a definition bug,
    /// not a runtime condition to recover from.
    pub fn build(self) -> Step {
        let callable = self
            .callable
            .expect("step callable must be set before build()");
        Step {
            name: self.name,
            dependencies: self.dependencies,
            callable,
            options: self.options,
        }
    }
}
