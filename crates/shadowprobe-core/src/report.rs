//! Per-trial records and run reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;

/// How a failing trial affects the rest of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Every trial runs; outcomes are reported individually.
    #[default]
    Isolated,
    /// The first failing trial ends the run.
    FailFast,
}

/// The outcome of a single trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrialOutcome {
    /// The observed value was inside the window.
    Passed {
        /// The observed value.
        value: f64,
    },
    /// The trial failed.
    Failed {
        /// Which stage failed.
        kind: ErrorKind,
        /// The error message.
        message: String,
        /// The observed value, when the failure was a range assertion.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<f64>,
    },
}

/// A log entry for one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    /// Unique identifier of this record.
    pub id: Uuid,
    /// One-based trial index.
    pub index: u32,
    /// When the trial finished.
    pub timestamp: DateTime<Utc>,
    /// Wall-clock duration of the trial.
    pub elapsed_ms: u64,
    /// Observe attempts made.
    pub attempts: u32,
    /// The outcome.
    pub outcome: TrialOutcome,
}

impl TrialRecord {
    /// Creates a record stamped with the current time.
    pub fn new(index: u32, elapsed_ms: u64, attempts: u32, outcome: TrialOutcome) -> Self {
        Self {
            id: Uuid::new_v4(),
            index,
            timestamp: Utc::now(),
            elapsed_ms,
            attempts,
            outcome,
        }
    }

    /// Whether the trial passed.
    pub fn passed(&self) -> bool {
        matches!(self.outcome, TrialOutcome::Passed { .. })
    }

    /// The observed value, if one was obtained.
    pub fn value(&self) -> Option<f64> {
        match &self.outcome {
            TrialOutcome::Passed { value } => Some(*value),
            TrialOutcome::Failed { value, .. } => *value,
        }
    }
}

/// Aggregated result of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Session the run used.
    pub session_id: Uuid,
    /// Trials requested.
    pub requested: u32,
    /// Trial records in execution order.
    pub trials: Vec<TrialRecord>,
    /// Setup failure, if the run never reached the first trial.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_error: Option<String>,
    /// Teardown failure. Never replaces trial failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teardown_error: Option<String>,
    /// True if the run stopped early because it was cancelled.
    #[serde(default)]
    pub cancelled: bool,
}

impl RunReport {
    /// An empty report for `requested` trials.
    pub fn new(session_id: Uuid, requested: u32) -> Self {
        Self {
            session_id,
            requested,
            trials: Vec::new(),
            setup_error: None,
            teardown_error: None,
            cancelled: false,
        }
    }

    /// Number of passed trials.
    pub fn passed(&self) -> usize {
        self.trials.iter().filter(|t| t.passed()).count()
    }

    /// Number of failed trials.
    pub fn failed(&self) -> usize {
        self.trials.len() - self.passed()
    }

    /// The first failed trial, if any.
    pub fn first_failure(&self) -> Option<&TrialRecord> {
        self.trials.iter().find(|t| !t.passed())
    }

    /// True only if setup succeeded, every requested trial ran and passed,
    /// and teardown succeeded.
    pub fn all_passed(&self) -> bool {
        self.setup_error.is_none()
            && self.teardown_error.is_none()
            && !self.cancelled
            && self.trials.len() == self.requested as usize
            && self.failed() == 0
    }

    /// The error kind that best describes why the run did not pass.
    ///
    /// Setup failures win, then trial failures, then teardown. `None` when
    /// the run passed.
    pub fn failure_kind(&self) -> Option<ErrorKind> {
        if self.setup_error.is_some() {
            return Some(ErrorKind::Setup);
        }
        if let Some(TrialOutcome::Failed { kind, .. }) = self.first_failure().map(|t| &t.outcome) {
            return Some(*kind);
        }
        if self.teardown_error.is_some() {
            return Some(ErrorKind::Teardown);
        }
        if self.cancelled || self.trials.len() != self.requested as usize {
            return Some(ErrorKind::Cancelled);
        }
        None
    }

    /// One-line human summary.
    pub fn summary(&self) -> String {
        let mut line = format!(
            "{}/{} trials passed",
            self.passed(),
            self.requested
        );
        if let Some(err) = &self.setup_error {
            line.push_str(&format!("; setup failed: {}", err));
        }
        if let Some(first) = self.first_failure() {
            if let TrialOutcome::Failed { message, .. } = &first.outcome {
                line.push_str(&format!("; first failure at trial {}: {}", first.index, message));
            }
        }
        if self.cancelled {
            line.push_str("; cancelled");
        }
        if let Some(err) = &self.teardown_error {
            line.push_str(&format!("; teardown failed: {}", err));
        }
        line
    }
}
