//! Inclusive numeric windows that observed values are checked against.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when building an [`AssertionWindow`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WindowError {
    /// The lower bound is greater than the upper bound.
    #[error("window lower bound {low} is greater than upper bound {high}")]
    Inverted {
        /// The requested lower bound.
        low: f64,
        /// The requested upper bound.
        high: f64,
    },

    /// A bound is NaN or infinite.
    #[error("window bounds must be finite (got [{low}, {high}])")]
    NotFinite {
        /// The requested lower bound.
        low: f64,
        /// The requested upper bound.
        high: f64,
    },
}

/// The closed range `[low, high]` an observed value must fall within.
///
/// Both edges are accepted: a value equal to `low` or `high` is in range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawWindow")]
pub struct AssertionWindow {
    low: f64,
    high: f64,
}

#[derive(Deserialize)]
struct RawWindow {
    low: f64,
    high: f64,
}

impl TryFrom<RawWindow> for AssertionWindow {
    type Error = WindowError;

    fn try_from(raw: RawWindow) -> Result<Self, Self::Error> {
        AssertionWindow::new(raw.low, raw.high)
    }
}

impl AssertionWindow {
    /// Creates a window, rejecting inverted or non-finite bounds.
    pub fn new(low: f64, high: f64) -> Result<Self, WindowError> {
        if !low.is_finite() || !high.is_finite() {
            return Err(WindowError::NotFinite { low, high });
        }
        if low > high {
            return Err(WindowError::Inverted { low, high });
        }
        Ok(Self { low, high })
    }

    /// The inclusive lower bound.
    pub fn low(&self) -> f64 {
        self.low
    }

    /// The inclusive upper bound.
    pub fn high(&self) -> f64 {
        self.high
    }

    /// Returns true if `value` lies within `[low, high]`.
    ///
    /// NaN is never contained.
    pub fn contains(&self, value: f64) -> bool {
        self.low <= value && value <= self.high
    }
}

impl Default for AssertionWindow {
    fn default() -> Self {
        Self { low: 20.0, high: 40.0 }
    }
}

impl std::fmt::Display for AssertionWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.low, self.high)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edges_are_inclusive() {
        let window = AssertionWindow::new(20.0, 40.0).unwrap();
        assert!(window.contains(20.0));
        assert!(window.contains(40.0));
        assert!(window.contains(25.0));
        assert!(!window.contains(19.999));
        assert!(!window.contains(40.001));
    }

    #[test]
    fn nan_is_never_in_range() {
        let window = AssertionWindow::default();
        assert!(!window.contains(f64::NAN));
    }

    #[test]
    fn degenerate_window_accepts_single_value() {
        let window = AssertionWindow::new(25.0, 25.0).unwrap();
        assert!(window.contains(25.0));
        assert!(!window.contains(25.5));
    }

    #[test]
    fn inverted_bounds_rejected() {
        let err = AssertionWindow::new(40.0, 20.0).unwrap_err();
        assert_eq!(err, WindowError::Inverted { low: 40.0, high: 20.0 });
    }

    #[test]
    fn infinite_bounds_rejected() {
        assert!(matches!(
            AssertionWindow::new(f64::NEG_INFINITY, 40.0),
            Err(WindowError::NotFinite { .. })
        ));
    }

    #[test]
    fn deserialize_validates_bounds() {
        let ok: AssertionWindow = serde_json::from_str(r#"{"low": 1, "high": 2}"#).unwrap();
        assert_eq!(ok.low(), 1.0);
        assert!(serde_json::from_str::<AssertionWindow>(r#"{"low": 3, "high": 2}"#).is_err());
    }

    #[test]
    fn display_shows_bounds() {
        assert_eq!(AssertionWindow::default().to_string(), "[20, 40]");
    }
}
