//! The recommended algorithm: keep the measurement with the lowest
//! dispersion.

use std::sync::Arc;

use lockstep_clocks::{Clock, Correlation};
use lockstep_wire::Candidate;
use tracing::debug;

use super::WallClockAlgorithm;

/// Adopts a candidate only when the dispersion of the estimate it would
/// produce is strictly lower than the tracked clock's current dispersion.
///
/// Dispersion is the error envelope of the estimate: server precision plus
/// half the round trip, growing over time with the maximum frequency error
/// at both ends. Because the current estimate's dispersion grows while a
/// fresh candidate's does not, a fresh measurement eventually wins even
/// when its round trip was longer.
///
/// The tracked clock starts with an infinite initial error, so the first
/// candidate is always adopted.
pub struct LowestDispersionCandidate {
    clock: Arc<Clock>,
    repeat_secs: f64,
    timeout_secs: f64,
}

impl LowestDispersionCandidate {
    /// `clock` is the correlated clock to discipline; requests repeat every
    /// `repeat_secs` while the estimate is improving, and at the (shorter)
    /// `timeout_secs` interval when it is not.
    pub fn new(clock: Arc<Clock>, repeat_secs: f64, timeout_secs: f64) -> Self {
        let unknown = clock
            .correlation()
            .unwrap_or_default()
            .with_initial_error(f64::INFINITY);
        let _ = clock.set_correlation(unknown);
        Self {
            clock,
            repeat_secs,
            timeout_secs,
        }
    }

    /// The dispersion of the tracked clock's estimate at this moment, in
    /// seconds.
    pub fn current_dispersion(&self) -> f64 {
        self.clock.dispersion()
    }

    /// The dispersion the tracked clock would have right now if it adopted
    /// `correlation`, evaluated on a shadow clock.
    fn dispersion_if_adopted(&self, correlation: Correlation) -> f64 {
        let Some(parent) = self.clock.parent() else {
            return f64::INFINITY;
        };
        match Clock::correlated(&parent, self.clock.tick_rate(), correlation) {
            Ok(shadow) => shadow.dispersion(),
            Err(_) => f64::INFINITY,
        }
    }

    fn pause(&self, secs: f64) {
        if let Some(source) = self.clock.root_source() {
            source.sleep(secs);
        }
    }
}

impl WallClockAlgorithm for LowestDispersionCandidate {
    fn first_timeout(&mut self) -> f64 {
        self.timeout_secs
    }

    fn on_candidate(&mut self, candidate: &Candidate) -> f64 {
        let adopted = match candidate.correlation_for(&self.clock, None) {
            Some(correlation) => {
                let current = self.current_dispersion();
                let offered = self.dispersion_if_adopted(correlation);
                if offered < current {
                    let _ = self.clock.set_correlation(correlation);
                    true
                } else {
                    false
                }
            }
            None => false,
        };
        debug!(
            adopted,
            dispersion_secs = self.current_dispersion(),
            "candidate considered"
        );
        // Retry sooner while the estimate is not improving.
        if adopted {
            self.pause(self.repeat_secs);
        } else {
            self.pause(self.timeout_secs);
        }
        self.timeout_secs
    }

    fn on_timeout(&mut self) -> f64 {
        debug!(
            dispersion_secs = self.current_dispersion(),
            "measurement timed out"
        );
        self.timeout_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_clocks::testing::MockTimeSource;
    use lockstep_wire::{WallClockMessage, WallClockMessageType};

    fn tracked_clock(source: &Arc<MockTimeSource>) -> Arc<Clock> {
        source.enable_auto_increment(0.000001, 1);
        let sys = Clock::system(source.clone(), 1e9).unwrap();
        source.disable_auto_increment();
        Clock::correlated(&sys, 1e9, Correlation::new(0.0, 0.0)).unwrap()
    }

    fn candidate_with(
        source_now_secs: f64,
        rtt_secs: f64,
        precision: i8,
    ) -> Candidate {
        let t1 = (source_now_secs * 1e9) as u64;
        let t4 = t1 + (rtt_secs * 1e9) as u64;
        let midpoint = t1 + (rtt_secs * 0.5e9) as u64;
        let response = WallClockMessage {
            message_type: WallClockMessageType::Response,
            precision,
            max_freq_error: 256 * 50,
            originate_nanos: t1,
            receive_nanos: midpoint,
            transmit_nanos: midpoint,
            original_originate: None,
        };
        Candidate::from_response(response, t4).unwrap()
    }

    #[test]
    fn first_candidate_is_always_adopted() {
        let source = MockTimeSource::new(10.0);
        let clock = tracked_clock(&source);
        let mut algorithm = LowestDispersionCandidate::new(clock.clone(), 0.0, 0.0);
        assert_eq!(algorithm.current_dispersion(), f64::INFINITY);

        algorithm.on_candidate(&candidate_with(10.0, 0.010, -20));
        assert!(algorithm.current_dispersion().is_finite());
    }

    #[test]
    fn worse_candidate_is_rejected_better_is_adopted() {
        let source = MockTimeSource::new(10.0);
        let clock = tracked_clock(&source);
        let mut algorithm = LowestDispersionCandidate::new(clock.clone(), 0.0, 0.0);

        // Good first measurement: 2 ms round trip.
        algorithm.on_candidate(&candidate_with(10.0, 0.002, -20));
        let good = clock.correlation().unwrap();

        // A much worse one moments later must not displace it.
        source.set_now(10.1);
        algorithm.on_candidate(&candidate_with(10.1, 0.200, -20));
        assert_eq!(clock.correlation().unwrap(), good);

        // A comparable one much later wins, because the old estimate's
        // dispersion has grown with time.
        source.set_now(500.0);
        algorithm.on_candidate(&candidate_with(500.0, 0.002, -20));
        assert_ne!(clock.correlation().unwrap(), good);
    }
}
