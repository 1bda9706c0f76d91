//! The naive algorithm: adopt every measurement.

use std::sync::Arc;

use lockstep_clocks::Clock;
use lockstep_wire::Candidate;
use tracing::debug;

use super::WallClockAlgorithm;

/// Adopts the correlation of every candidate, regardless of its quality.
///
/// Useful as a baseline and in controlled networks; prefer
/// [`super::LowestDispersionCandidate`] elsewhere.
pub struct MostRecent {
    clock: Arc<Clock>,
    repeat_secs: f64,
    timeout_secs: f64,
}

impl MostRecent {
    /// `clock` is the correlated clock to discipline; requests repeat every
    /// `repeat_secs`, waiting up to `timeout_secs` for each response.
    pub fn new(clock: Arc<Clock>, repeat_secs: f64, timeout_secs: f64) -> Self {
        Self {
            clock,
            repeat_secs,
            timeout_secs,
        }
    }

    fn pause(&self, secs: f64) {
        if let Some(source) = self.clock.root_source() {
            source.sleep(secs);
        }
    }
}

impl WallClockAlgorithm for MostRecent {
    fn first_timeout(&mut self) -> f64 {
        self.timeout_secs
    }

    fn on_candidate(&mut self, candidate: &Candidate) -> f64 {
        if let Some(correlation) = candidate.correlation_for(&self.clock, None) {
            debug!(offset_nanos = candidate.offset_nanos, "adopting candidate");
            let _ = self.clock.set_correlation(correlation);
        }
        self.pause(self.repeat_secs);
        self.timeout_secs
    }

    fn on_timeout(&mut self) -> f64 {
        self.timeout_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_clocks::testing::MockTimeSource;
    use lockstep_clocks::Correlation;
    use lockstep_wire::{WallClockMessage, WallClockMessageType};

    fn tracked_clock(source: &Arc<MockTimeSource>) -> Arc<Clock> {
        source.enable_auto_increment(0.000001, 1);
        let sys = Clock::system(source.clone(), 1e9).unwrap();
        source.disable_auto_increment();
        Clock::correlated(&sys, 1e9, Correlation::new(0.0, 0.0)).unwrap()
    }

    #[test]
    fn every_candidate_is_adopted() {
        let source = MockTimeSource::new(10.0);
        let clock = tracked_clock(&source);
        // Zero repeat so pacing does not advance the mock source.
        let mut algorithm = MostRecent::new(clock.clone(), 0.0, 0.2);

        // Server five seconds ahead, symmetric 2 ms round trip.
        let response = WallClockMessage {
            message_type: WallClockMessageType::Response,
            precision: -20,
            max_freq_error: 256 * 50,
            originate_nanos: 10_000_000_000,
            receive_nanos: 15_001_000_000,
            transmit_nanos: 15_001_000_000,
            original_originate: None,
        };
        let candidate =
            lockstep_wire::Candidate::from_response(response, 10_002_000_000).unwrap();

        let next_timeout = algorithm.on_candidate(&candidate);
        assert_eq!(next_timeout, 0.2);

        // The clock now reads roughly five seconds ahead of its parent.
        let offset_nanos = clock.ticks() - clock.parent().unwrap().ticks();
        assert!((offset_nanos - 5_000_000_000.0).abs() < 10_000_000.0);
    }
}
