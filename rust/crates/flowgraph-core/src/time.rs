//! Time utilities shared by `StepResult`/`RunResult` timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp wrapper for consistent serialization across the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Capture the current instant.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Wrap an existing `DateTime<Utc>`.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// The wrapped `DateTime<Utc>`.
    pub fn inner(&self) -> DateTime<Utc> {
        self.0
    }

    /// Wall-clock duration elapsed between two timestamps. Returns zero if
    /// `other` is earlier than `self` (clock skew, not a logic error the
    /// caller should have to handle).
    pub fn elapsed_since(&self, other: Timestamp) -> DurationMs {
        let millis = (self.0 - other.0).num_milliseconds().max(0);
        DurationMs(millis as u64)
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

/// A duration in whole milliseconds, used for step timeouts and retry
/// backoff so the engine never has to reason about sub-millisecond jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DurationMs(u64);

impl DurationMs {
    pub fn new(ms: u64) -> Self {
        Self(ms)
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Self((secs * 1000.0).max(0.0).round() as u64)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    pub fn as_std(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.0)
    }
}

impl From<std::time::Duration> for DurationMs {
    fn from(d: std::time::Duration) -> Self {
        Self(d.as_millis() as u64)
    }
}
