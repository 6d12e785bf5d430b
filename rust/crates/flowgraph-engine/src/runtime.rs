//! Shared executor runtime: cache lookup, conditional evaluation,
//! retry/timeout loop, and input marshalling. Both the sequential and
//! parallel executors drive a DAG through these same primitives; they
//! differ only in *which steps run when*.

use crate::cache::{Cache, CachedResult};
use crate::step::{Step, StepInput, Value};
use flowgraph_core::time::Timestamp;
use std::collections::{BTreeMap, HashMap};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::result::StepResult;

/// Build the input shape an executor hands to a step's callable and
/// predicates, from that step's dependency outputs.
///
/// `outputs` maps a dependency name to its output — `None` if that
/// dependency's step was skipped, which marshals to `Value::Null`.
pub fn marshal_input(
    dependencies: &[String],
    outputs: &HashMap<String, Option<Value>>,
    initial_input: Option<&Value>,
) -> StepInput {
    match dependencies.len() {
        0 => match initial_input {
            Some(v) => StepInput::One(v.clone()),
            None => StepInput::None,
        },
        1 => {
            let v = outputs
                .get(&dependencies[0])
                .cloned()
                .flatten()
                .unwrap_or(Value::Null);
            StepInput::One(v)
        }
        _ => {
            let map: BTreeMap<String, Value> = dependencies
                .iter()
                .map(|d| {
                    let v = outputs.get(d).cloned().flatten().unwrap_or(Value::Null);
                    (d.clone(), v)
                })
                .collect();
            StepInput::Many(map)
        }
    }
}

fn compute_cache_key(step: &Step, input: &StepInput) -> String {
    match &step.options().cache_key {
        Some(f) => (**f)(input),
        None => step.name().to_string(),
    }
}

/// Invoke `step`'s callable, enforcing its `timeout` option if set.
/// Returns `(result, timed_out)`. On timeout, the spawned thread is
/// abandoned rather than forcibly killed — Rust has no safe cross-thread
/// interruption, so the deadline is enforced from the scheduler's side
/// only.
fn invoke_with_timeout(step: &Step, input: StepInput) -> (anyhow::Result<Value>, bool) {
    let Some(timeout) = step.options().timeout else {
        return ((*step.callable_handle())(&input), false);
    };

    let callable = step.callable_handle();
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let result = (*callable)(&input);
        let _ = tx.send(result);
    });

    match rx.recv_timeout(timeout) {
        Ok(result) => (result, false),
        Err(_) => (
            Err(anyhow::anyhow!(
                "timed out after {}ms",
                timeout.as_millis()
            )),
            true,
        ),
    }
}

/// Run one step to completion: cache lookup, conditional skip, then the
/// retry/timeout loop. Never returns an `Err` — every terminal state
/// (success, failure, skip, timeout) is represented in the returned
/// `StepResult`; it's the caller's job (the sequential/parallel executor)
/// to decide whether a non-success result aborts the run.
#[instrument(skip(step, input, cache), fields(step = step.name()))]
pub fn run_step(step: &Step, input: &StepInput, cache: Option<&dyn Cache>, force: bool) -> StepResult {
    let opts = step.options();
    let started_at = Timestamp::now();

    if opts.cache && !force {
        if let Some(cache) = cache {
            let key = compute_cache_key(step, input);
            if let Some(cached) = cache.read(&key) {
                let finished_at = Timestamp::now();
                debug!(key, "cache hit");
                return if cached.is_skipped() {
                    StepResult::skipped(step.name(), started_at, finished_at)
                } else {
                    StepResult::success(
                        step.name(),
                        cached.output.unwrap_or(Value::Null),
                        started_at,
                        finished_at,
                        0,
                    )
                };
            }
        }
    }

    let if_value = opts.if_cond.as_ref().map_or(true, |f| (**f)(input));
    let unless_value = opts.unless.as_ref().map_or(false, |f| (**f)(input));
    if !(if_value && !unless_value) {
        let finished_at = Timestamp::now();
        if opts.cache {
            if let Some(cache) = cache {
                // Persist under the step name, not `cache_key` — a
                // skipped step has no semantically meaningful input.
                cache.write(step.name(), CachedResult::skipped());
            }
        }
        debug!("step skipped by if/unless");
        return StepResult::skipped(step.name(), started_at, finished_at);
    }

    let mut attempt: u32 = 1;
    loop {
        let (outcome, timed_out) = invoke_with_timeout(step, input.clone());
        match outcome {
            Ok(output) => {
                let retries = attempt - 1;
                let finished_at = Timestamp::now();
                if opts.cache {
                    if let Some(cache) = cache {
                        let key = compute_cache_key(step, input);
                        cache.write(&key, CachedResult::success(output.clone()));
                    }
                }
                return StepResult::success(step.name(), output, started_at, finished_at, retries);
            }
            Err(err) => {
                let retries_done = attempt - 1;
                let retry_allowed = opts.retry_if.as_ref().map_or(true, |f| (**f)(&err));
                if retries_done < opts.retries && retry_allowed {
                    let k = attempt;
                    let delay_ms = opts
                        .retry_backoff
                        .delay_ms(opts.retry_delay.as_millis() as u64, k);
                    warn!(attempt, %err, delay_ms, "step attempt failed, retrying");
                    thread::sleep(Duration::from_millis(delay_ms));
                    attempt += 1;
                    continue;
                }

                let retries = attempt - 1;
                let finished_at = Timestamp::now();
                return if timed_out {
                    StepResult::timed_out(step.name(), started_at, finished_at, retries)
                } else {
                    StepResult::failure(step.name(), &err, started_at, finished_at, retries)
                };
            }
        }
    }
}
