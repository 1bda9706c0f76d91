//! Algorithms that decide when to measure and how each measurement
//! disciplines the tracked clock.
//!
//! An algorithm is a stepping object: the client engine calls
//! [`WallClockAlgorithm::on_candidate`] with each measurement (or
//! [`WallClockAlgorithm::on_timeout`] when a round produced nothing) and the
//! return value is the response timeout for the next round. An algorithm
//! paces the request rate by sleeping on the clock's time source before
//! returning.

mod dispersion;
mod filter_predict;
mod simple;

pub use dispersion::LowestDispersionCandidate;
pub use filter_predict::{
    CandidateFilter, CandidatePredictor, FilterAndPredict, LowestDispersionFilter,
    MostRecentPredictor, RttThresholdFilter,
};
pub use simple::MostRecent;

use lockstep_wire::Candidate;

/// A wall-clock disciplining algorithm.
pub trait WallClockAlgorithm: Send {
    /// Response timeout, in seconds, for the first measurement round.
    fn first_timeout(&mut self) -> f64;

    /// Process the result of a successful measurement round. Returns the
    /// response timeout for the next round.
    fn on_candidate(&mut self, candidate: &Candidate) -> f64;

    /// Process a round that timed out without a usable response. Returns
    /// the response timeout for the next round.
    fn on_timeout(&mut self) -> f64;
}
