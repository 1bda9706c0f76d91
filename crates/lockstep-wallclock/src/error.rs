//! Wall-clock engine error types.

use thiserror::Error;

pub type WallClockResult<T> = Result<T, WallClockError>;

/// Errors from the wall-clock client and server engines.
#[derive(Debug, Error)]
pub enum WallClockError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wire protocol error: {0}")]
    Wire(#[from] lockstep_wire::WireError),

    #[error("clock error: {0}")]
    Clock(#[from] lockstep_clocks::ClockError),

    /// The disciplined clock must have a parent: measurements are taken
    /// from the parent while the clock itself models the server.
    #[error("the disciplined clock has no parent clock to measure")]
    NoParentClock,
}
