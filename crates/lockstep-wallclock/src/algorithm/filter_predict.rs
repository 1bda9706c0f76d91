//! A modular algorithm: a pipeline of candidate filters feeding a
//! predictor.

use std::sync::Arc;

use lockstep_clocks::{Clock, Correlation};
use lockstep_wire::Candidate;
use tracing::debug;

use super::WallClockAlgorithm;

/// Decides whether a measurement candidate is usable at all.
pub trait CandidateFilter: Send {
    fn check_candidate(&mut self, candidate: &Candidate) -> bool;
}

/// Turns surviving candidates into the correlation the clock should adopt.
pub trait CandidatePredictor: Send {
    fn predict(&mut self, candidate: &Candidate, clock: &Arc<Clock>) -> Option<Correlation>;
}

/// Predictor that simply uses the most recent surviving candidate.
#[derive(Default)]
pub struct MostRecentPredictor;

impl CandidatePredictor for MostRecentPredictor {
    fn predict(&mut self, candidate: &Candidate, clock: &Arc<Clock>) -> Option<Correlation> {
        candidate.correlation_for(clock, None)
    }
}

/// Rejects candidates whose round-trip time exceeds a threshold.
pub struct RttThresholdFilter {
    threshold_nanos: i64,
}

impl RttThresholdFilter {
    pub fn new(threshold_millis: f64) -> Self {
        Self {
            threshold_nanos: (threshold_millis * 1e6) as i64,
        }
    }
}

impl CandidateFilter for RttThresholdFilter {
    fn check_candidate(&mut self, candidate: &Candidate) -> bool {
        candidate.rtt_nanos <= self.threshold_nanos
    }
}

/// Rejects a candidate unless the dispersion of the estimate it would
/// produce is lower than that of every candidate seen before it.
pub struct LowestDispersionFilter {
    clock: Arc<Clock>,
    best_dispersion: f64,
}

impl LowestDispersionFilter {
    /// `clock` must be the clock the enclosing algorithm disciplines; it is
    /// only used to evaluate hypothetical dispersions.
    pub fn new(clock: Arc<Clock>) -> Self {
        Self {
            clock,
            best_dispersion: f64::INFINITY,
        }
    }
}

impl CandidateFilter for LowestDispersionFilter {
    fn check_candidate(&mut self, candidate: &Candidate) -> bool {
        let Some(correlation) = candidate.correlation_for(&self.clock, None) else {
            return false;
        };
        let Some(parent) = self.clock.parent() else {
            return false;
        };
        let offered = match Clock::correlated(&parent, self.clock.tick_rate(), correlation) {
            Ok(shadow) => shadow.dispersion(),
            Err(_) => return false,
        };
        if offered < self.best_dispersion {
            self.best_dispersion = offered;
            true
        } else {
            false
        }
    }
}

/// Combines zero or more filters and a predictor into a wall-clock
/// algorithm.
///
/// Candidates pass through the filters in order; any rejection drops the
/// candidate. Survivors are given to the predictor, whose correlation is
/// written to the clock.
pub struct FilterAndPredict {
    clock: Arc<Clock>,
    repeat_secs: f64,
    timeout_secs: f64,
    filters: Vec<Box<dyn CandidateFilter>>,
    predictor: Box<dyn CandidatePredictor>,
}

impl FilterAndPredict {
    pub fn new(
        clock: Arc<Clock>,
        repeat_secs: f64,
        timeout_secs: f64,
        filters: Vec<Box<dyn CandidateFilter>>,
        predictor: Box<dyn CandidatePredictor>,
    ) -> Self {
        Self {
            clock,
            repeat_secs,
            timeout_secs,
            filters,
            predictor,
        }
    }

    fn pause(&self, secs: f64) {
        if let Some(source) = self.clock.root_source() {
            source.sleep(secs);
        }
    }
}

impl WallClockAlgorithm for FilterAndPredict {
    fn first_timeout(&mut self) -> f64 {
        self.timeout_secs
    }

    fn on_candidate(&mut self, candidate: &Candidate) -> f64 {
        let accepted = self
            .filters
            .iter_mut()
            .all(|filter| filter.check_candidate(candidate));
        if accepted {
            if let Some(correlation) = self.predictor.predict(candidate, &self.clock) {
                debug!(offset_nanos = candidate.offset_nanos, "prediction adopted");
                let _ = self.clock.set_correlation(correlation);
            }
        } else {
            debug!(rtt_nanos = candidate.rtt_nanos, "candidate filtered out");
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
    use lockstep_wire::{WallClockMessage, WallClockMessageType};

    fn tracked_clock() -> Arc<Clock> {
        let source = MockTimeSource::new(10.0);
        source.enable_auto_increment(0.000001, 1);
        let sys = Clock::system(source.clone(), 1e9).unwrap();
        source.disable_auto_increment();
        Clock::correlated(&sys, 1e9, Correlation::new(0.0, 0.0)).unwrap()
    }

    fn candidate(rtt_nanos: u64, server_ahead_nanos: u64) -> Candidate {
        let t1 = 10_000_000_000u64;
        let t4 = t1 + rtt_nanos;
        let server_mid = t1 + rtt_nanos / 2 + server_ahead_nanos;
        let response = WallClockMessage {
            message_type: WallClockMessageType::Response,
            precision: -20,
            max_freq_error: 256 * 50,
            originate_nanos: t1,
            receive_nanos: server_mid,
            transmit_nanos: server_mid,
            original_originate: None,
        };
        Candidate::from_response(response, t4).unwrap()
    }

    #[test]
    fn rtt_filter_thresholds_round_trips() {
        let mut filter = RttThresholdFilter::new(10.0);
        assert!(filter.check_candidate(&candidate(2_000_000, 0)));
        assert!(!filter.check_candidate(&candidate(50_000_000, 0)));
    }

    #[test]
    fn lowest_dispersion_filter_requires_improvement() {
        let clock = tracked_clock();
        let mut filter = LowestDispersionFilter::new(clock);
        assert!(filter.check_candidate(&candidate(2_000_000, 0)));
        // Same quality again: not an improvement.
        assert!(!filter.check_candidate(&candidate(2_000_000, 0)));
        assert!(filter.check_candidate(&candidate(200_000, 0)));
    }

    #[test]
    fn filtered_candidates_do_not_move_the_clock() {
        let clock = tracked_clock();
        let before = clock.correlation().unwrap();
        let mut algorithm = FilterAndPredict::new(
            clock.clone(),
            0.0,
            0.2,
            vec![Box::new(RttThresholdFilter::new(10.0))],
            Box::new(MostRecentPredictor),
        );

        algorithm.on_candidate(&candidate(50_000_000, 5_000_000_000));
        assert_eq!(clock.correlation().unwrap(), before);

        algorithm.on_candidate(&candidate(2_000_000, 5_000_000_000));
        assert_ne!(clock.correlation().unwrap(), before);
        let offset_nanos = clock.ticks() - clock.parent().unwrap().ticks();
        assert!((offset_nanos - 5_000_000_000.0).abs() < 10_000_000.0);
    }
}
