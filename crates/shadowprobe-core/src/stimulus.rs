//! Stimulus events applied to the device under test.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default input line pressed by a trial.
pub const DEFAULT_INPUT_LINE: &str = "BUTTON1";

/// A discrete input transition applied to a running simulation.
///
/// The line is driven high, held for `hold`, released, and the simulation is
/// then advanced by `settle` so firmware can react and publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StimulusEvent {
    /// Name of the digital input line (e.g. `BUTTON1`).
    pub line: String,
    /// Simulated time the line stays high.
    #[serde(with = "millis")]
    pub hold: Duration,
    /// Simulated time advanced after the line is released.
    #[serde(with = "millis")]
    pub settle: Duration,
}

impl StimulusEvent {
    /// A press-and-release on `line`.
    pub fn press(line: impl Into<String>, hold: Duration, settle: Duration) -> Self {
        Self {
            line: line.into(),
            hold,
            settle,
        }
    }

    /// Total simulated time this stimulus consumes.
    pub fn total(&self) -> Duration {
        self.hold + self.settle
    }
}

impl Default for StimulusEvent {
    fn default() -> Self {
        Self::press(
            DEFAULT_INPUT_LINE,
            Duration::from_millis(60),
            Duration::from_millis(600),
        )
    }
}

/// Serializes a [`Duration`] as integer milliseconds.
pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
