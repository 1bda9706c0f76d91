//! Correlation between a child clock and its parent.

use std::fmt;

/// A point tying a child clock's tick value to its parent's tick value.
///
/// When the parent clock reads `parent_ticks`, the child clock reads
/// `child_ticks`. The error fields carry the bounds of that relationship:
/// `initial_error` is the error in seconds at the moment of correlation, and
/// `error_growth_rate` is how quickly the error grows (seconds per second of
/// parent time) as the parent moves away from `parent_ticks`.
///
/// Correlations are immutable values. Use the `with_*` methods to obtain a
/// copy with selected fields replaced:
///
/// ```
/// use lockstep_clocks::Correlation;
///
/// let c = Correlation::with_error(100.0, 0.0, 0.5, 0.001);
/// let c2 = c.with_child_ticks(25.0);
/// assert_eq!(c2, Correlation::with_error(100.0, 25.0, 0.5, 0.001));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct Correlation {
    pub parent_ticks: f64,
    pub child_ticks: f64,
    pub initial_error: f64,
    pub error_growth_rate: f64,
}

impl Correlation {
    /// A correlation with zero initial error and zero error growth.
    pub fn new(parent_ticks: f64, child_ticks: f64) -> Self {
        Self {
            parent_ticks,
            child_ticks,
            initial_error: 0.0,
            error_growth_rate: 0.0,
        }
    }

    /// A correlation carrying explicit error bounds.
    pub fn with_error(
        parent_ticks: f64,
        child_ticks: f64,
        initial_error: f64,
        error_growth_rate: f64,
    ) -> Self {
        Self {
            parent_ticks,
            child_ticks,
            initial_error,
            error_growth_rate,
        }
    }

    pub fn with_parent_ticks(self, parent_ticks: f64) -> Self {
        Self {
            parent_ticks,
            ..self
        }
    }

    pub fn with_child_ticks(self, child_ticks: f64) -> Self {
        Self {
            child_ticks,
            ..self
        }
    }

    pub fn with_initial_error(self, initial_error: f64) -> Self {
        Self {
            initial_error,
            ..self
        }
    }

    pub fn with_error_growth_rate(self, error_growth_rate: f64) -> Self {
        Self {
            error_growth_rate,
            ..self
        }
    }
}

impl PartialEq for Correlation {
    fn eq(&self, other: &Self) -> bool {
        self.parent_ticks == other.parent_ticks
            && self.child_ticks == other.child_ticks
            && self.initial_error == other.initial_error
            && self.error_growth_rate == other.error_growth_rate
    }
}

/// A correlation equals a `(parent_ticks, child_ticks)` pair when the first
/// two fields match, regardless of the error fields.
impl PartialEq<(f64, f64)> for Correlation {
    fn eq(&self, other: &(f64, f64)) -> bool {
        self.parent_ticks == other.0 && self.child_ticks == other.1
    }
}

impl PartialEq<Correlation> for (f64, f64) {
    fn eq(&self, other: &Correlation) -> bool {
        other == self
    }
}

impl fmt::Display for Correlation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Correlation({}, {}, {}, {})",
            self.parent_ticks, self.child_ticks, self.initial_error, self.error_growth_rate
        )
    }
}
