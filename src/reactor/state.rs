//! Build results.
//!
//! One [`UnitResult`] per unit per task segment, collected into a
//! [`BuildSummary`].

use crate::config::FailurePolicy;
use crate::errors::{BuildError, ErrorKind};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// How a unit finished a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitOutcome {
    Success,
    Failed,
    Skipped,
}

impl std::fmt::Display for UnitOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitOutcome::Success => write!(f, "SUCCESS"),
            UnitOutcome::Failed => write!(f, "FAILURE"),
            UnitOutcome::Skipped => write!(f, "SKIPPED"),
        }
    }
}

/// Result of building one unit for one segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitResult {
    pub unit: String,
    /// Index of the task segment
    pub segment: usize,
    pub outcome: UnitOutcome,
    /// Error message or skip reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Last phase recorded for the unit when it finished
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_phase: Option<String>,
    /// Steps that ran to completion
    pub steps: usize,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

impl UnitResult {
    pub fn success(unit: &str, segment: usize, steps: usize, duration: Duration) -> Self {
        Self {
            unit: unit.to_string(),
            segment,
            outcome: UnitOutcome::Success,
            error: None,
            error_kind: None,
            last_phase: None,
            steps,
            duration,
        }
    }

    pub fn failure(unit: &str, segment: usize, error: &BuildError, duration: Duration) -> Self {
        Self {
            unit: unit.to_string(),
            segment,
            outcome: UnitOutcome::Failed,
            error: Some(error.message.clone()),
            error_kind: Some(error.kind),
            last_phase: None,
            steps: 0,
            duration,
        }
    }

    pub fn skipped(unit: &str, segment: usize, reason: &str) -> Self {
        Self {
            unit: unit.to_string(),
            segment,
            outcome: UnitOutcome::Skipped,
            error: Some(reason.to_string()),
            error_kind: None,
            last_phase: None,
            steps: 0,
            duration: Duration::ZERO,
        }
    }

    pub fn with_last_phase(mut self, phase: Option<String>) -> Self {
        self.last_phase = phase;
        self
    }

    pub fn with_steps(mut self, steps: usize) -> Self {
        self.steps = steps;
        self
    }
}

/// Summary of a whole build.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildSummary {
    /// Unit runs attempted or skipped, across all segments
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Results in completion order
    #[serde(default)]
    pub results: Vec<UnitResult>,
    pub failure_policy: FailurePolicy,
}

impl BuildSummary {
    pub fn new(failure_policy: FailurePolicy) -> Self {
        Self {
            failure_policy,
            ..Default::default()
        }
    }

    pub fn add_result(&mut self, result: UnitResult) {
        self.total += 1;
        match result.outcome {
            UnitOutcome::Success => self.succeeded += 1,
            UnitOutcome::Failed => self.failed += 1,
            UnitOutcome::Skipped => self.skipped += 1,
        }
        self.results.push(result);
    }

    pub fn mark_skipped(&mut self, unit: &str, segment: usize, reason: &str) {
        self.add_result(UnitResult::skipped(unit, segment, reason));
    }

    /// Whether the build counts as successful. Under fail-never failures
    /// are reported but never fail the build.
    pub fn is_success(&self) -> bool {
        self.failed == 0 || self.failure_policy == FailurePolicy::FailNever
    }

    pub fn failures(&self) -> impl Iterator<Item = &UnitResult> {
        self.results
            .iter()
            .filter(|r| r.outcome == UnitOutcome::Failed)
    }

    /// Result of `unit` in `segment`.
    pub fn result(&self, unit: &str, segment: usize) -> Option<&UnitResult> {
        self.results
            .iter()
            .find(|r| r.unit == unit && r.segment == segment)
    }

    pub fn outcome(&self, unit: &str, segment: usize) -> Option<UnitOutcome> {
        self.result(unit, segment).map(|r| r.outcome)
    }
}

/// Tracks execution timing.
pub struct ExecutionTimer {
    start: Instant,
}

impl ExecutionTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Durations as milliseconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
