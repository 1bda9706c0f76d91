//! Clock error types.

use thiserror::Error;

/// Result type for clock operations.
pub type ClockResult<T> = Result<T, ClockError>;

/// Errors that can occur when constructing or mutating clocks.
#[derive(Debug, Error)]
pub enum ClockError {
    /// A tick conversion was attempted between clocks with no shared root.
    #[error("no common ancestor clock between the clocks in the conversion")]
    NoCommonClock,

    /// The operation is not supported by this kind of clock, e.g. changing
    /// the speed of a system clock.
    #[error("cannot change {0} on this kind of clock")]
    NotImplemented(&'static str),

    /// Tick rates must be positive and finite.
    #[error("invalid tick rate: {0}")]
    InvalidTickRate(f64),
}
