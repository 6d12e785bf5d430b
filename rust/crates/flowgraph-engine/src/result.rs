//! Per-step and aggregate execution records.

use crate::step::Value;
use flowgraph_core::time::{DurationMs, Timestamp};
use flowgraph_core::RunId;
use serde::{Deserialize, Serialize};

/// Terminal state of a step within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failed,
    Skipped,
    TimedOut,
}

/// The recorded outcome of running (or not running) a single step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub name: String,
    pub status: StepStatus,
    pub output: Option<Value>,
    /// Rendered error message, if any. Kept as a string (rather than the
    /// `anyhow::Error` itself) so `StepResult` stays `Serialize`.
    pub error: Option<String>,
    pub retries: u32,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    pub duration: DurationMs,
}

impl StepResult {
    pub fn success(
        name: impl Into<String>,
        output: Value,
        started_at: Timestamp,
        finished_at: Timestamp,
        retries: u32,
    ) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Success,
            output: Some(output),
            error: None,
            retries,
            started_at,
            finished_at,
            duration: finished_at.elapsed_since(started_at),
        }
    }

    pub fn failure(
        name: impl Into<String>,
        error: &anyhow::Error,
        started_at: Timestamp,
        finished_at: Timestamp,
        retries: u32,
    ) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Failed,
            output: None,
            error: Some(error.to_string()),
            retries,
            started_at,
            finished_at,
            duration: finished_at.elapsed_since(started_at),
        }
    }

    pub fn skipped(name: impl Into<String>, started_at: Timestamp, finished_at: Timestamp) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Skipped,
            output: None,
            error: None,
            retries: 0,
            started_at,
            finished_at,
            duration: finished_at.elapsed_since(started_at),
        }
    }

    pub fn timed_out(
        name: impl Into<String>,
        started_at: Timestamp,
        finished_at: Timestamp,
        retries: u32,
    ) -> Self {
        let duration = finished_at.elapsed_since(started_at);
        Self {
            name: name.into(),
            status: StepStatus::TimedOut,
            output: None,
            error: Some(format!("timed out after {}ms", duration.as_millis())),
            retries,
            started_at,
            finished_at,
            duration,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }

    pub fn is_failed(&self) -> bool {
        self.status == StepStatus::Failed
    }

    pub fn is_skipped(&self) -> bool {
        self.status == StepStatus::Skipped
    }

    pub fn is_timed_out(&self) -> bool {
        self.status == StepStatus::TimedOut
    }
}

/// The aggregate record of a pipeline run: every attempted step's result,
/// in insertion order, plus wall-clock bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: RunId,
    results: Vec<(String, StepResult)>,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    pub duration: DurationMs,
}

impl RunResult {
    pub fn new(run_id: RunId, results: Vec<(String, StepResult)>, started_at: Timestamp, finished_at: Timestamp) -> Self {
        Self {
            run_id,
            duration: finished_at.elapsed_since(started_at),
            results,
            started_at,
            finished_at,
        }
    }

    /// A run is successful iff no step is failed or timed out (skipped
    /// counts as success).
    pub fn is_success(&self) -> bool {
        self.results
            .iter()
            .all(|(_, r)| !r.is_failed() && !r.is_timed_out())
    }

    pub fn get(&self, name: &str) -> Option<&StepResult> {
        self.results.iter().find(|(n, _)| n == name).map(|(_, r)| r)
    }

    /// Step results in the order the steps were attempted.
    pub fn iter(&self) -> impl Iterator<Item = &(String, StepResult)> {
        self.results.iter()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
