//! Harness error types.
//!
//! Each stage of a trial fails with its own [`HarnessError`] variant so a
//! runner can tell a broken setup from a slow cloud from a wrong value.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shadow::{FieldError, ShadowError};
use crate::simulator::SimulatorError;
use crate::window::AssertionWindow;

/// Stage a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The simulator could not be started or driven.
    Setup,
    /// The state store could not be read or returned unusable data.
    Observation,
    /// The observed value was outside the window.
    RangeAssertion,
    /// Resources could not be released.
    Teardown,
    /// The run stopped before all trials ran.
    Cancelled,
}

/// Why a state-store observation failed.
#[derive(Error, Debug)]
pub enum ObservationFailure {
    /// The query failed.
    #[error(transparent)]
    Store(#[from] ShadowError),

    /// The document lacked a usable value.
    #[error(transparent)]
    Field(#[from] FieldError),
}

/// Errors raised by the reconciliation harness.
#[derive(Error, Debug)]
pub enum HarnessError {
    /// The session could not be established or the simulator stopped responding.
    #[error("setup failed: {0}")]
    Setup(#[source] SimulatorError),

    /// An operation required a running session.
    #[error("setup failed: session not started")]
    NotStarted,

    /// Reading the observed state failed.
    #[error("observation of '{device_id}' failed: {source}")]
    Observation {
        /// Device whose shadow was queried.
        device_id: String,
        /// What went wrong.
        source: ObservationFailure,
    },

    /// The observed value was outside the window.
    #[error("value {value} outside expected range {window}")]
    RangeAssertion {
        /// The observed value.
        value: f64,
        /// The expected window.
        window: AssertionWindow,
    },

    /// The session could not be released.
    #[error("teardown failed: {0}")]
    Teardown(#[source] SimulatorError),
}

impl HarnessError {
    /// The stage this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            HarnessError::Setup(_) | HarnessError::NotStarted => ErrorKind::Setup,
            HarnessError::Observation { .. } => ErrorKind::Observation,
            HarnessError::RangeAssertion { .. } => ErrorKind::RangeAssertion,
            HarnessError::Teardown(_) => ErrorKind::Teardown,
        }
    }

    pub(crate) fn observation(device_id: &str, source: impl Into<ObservationFailure>) -> Self {
        HarnessError::Observation {
            device_id: device_id.to_string(),
            source: source.into(),
        }
    }

    /// The observed value carried by a range assertion failure.
    pub fn value(&self) -> Option<f64> {
        match self {
            HarnessError::RangeAssertion { value, .. } => Some(*value),
            _ => None,
        }
    }
}
