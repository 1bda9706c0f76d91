//! Timeline sources: where the server's Control Timestamps come from.

use std::sync::{Arc, Mutex};

use lockstep_clocks::Clock;
use lockstep_wire::ControlTimestamp;

use crate::bigint_from_ticks;

/// A source of Control Timestamps for some set of timeline selectors.
///
/// Sources are registered with a [`crate::TsServer`]. For each connection
/// the server uses the first attached source that recognises the
/// connection's timeline selector.
///
/// The needed/not-needed callbacks are reference counted across
/// connections: `timeline_selector_needed` fires when the first client asks
/// for a selector, `timeline_selector_not_needed` when the last one goes
/// away. Use them to start and stop whatever extracts the timeline.
///
/// Callbacks may run with the server's connection table locked; do not call
/// back into the server from them.
pub trait TimelineSource: Send + Sync {
    /// Whether this source can provide Control Timestamps for a selector.
    fn recognises_timeline_selector(&self, timeline_selector: &str) -> bool;

    /// The current Control Timestamp for a selector this source recognises.
    ///
    /// Return the unavailable form (null content time) when the timeline is
    /// known to be unavailable, or `None` when nothing should be sent yet
    /// (e.g. extraction is still starting up and the answer is unknown).
    fn control_timestamp(&self, timeline_selector: &str) -> Option<ControlTimestamp>;

    fn timeline_selector_needed(&self, _timeline_selector: &str) {}

    fn timeline_selector_not_needed(&self, _timeline_selector: &str) {}

    /// A server started using this source.
    fn sink_attached(&self) {}

    /// A server stopped using this source.
    fn sink_detached(&self) {}
}

/// A source for a fixed selector whose Control Timestamp is set manually.
pub struct SimpleTimelineSource {
    timeline_selector: String,
    control_timestamp: Mutex<Option<ControlTimestamp>>,
}

impl SimpleTimelineSource {
    pub fn new(
        timeline_selector: impl Into<String>,
        control_timestamp: Option<ControlTimestamp>,
    ) -> Arc<Self> {
        Arc::new(Self {
            timeline_selector: timeline_selector.into(),
            control_timestamp: Mutex::new(control_timestamp),
        })
    }

    /// Replace the Control Timestamp handed to clients. Call
    /// [`crate::TsServer::update_all_clients`] afterwards to push it.
    pub fn set_control_timestamp(&self, control_timestamp: Option<ControlTimestamp>) {
        *self.control_timestamp.lock().unwrap() = control_timestamp;
    }
}

impl TimelineSource for SimpleTimelineSource {
    fn recognises_timeline_selector(&self, timeline_selector: &str) -> bool {
        self.timeline_selector == timeline_selector
    }

    fn control_timestamp(&self, _timeline_selector: &str) -> Option<ControlTimestamp> {
        self.control_timestamp.lock().unwrap().clone()
    }
}

/// A source whose Control Timestamps reflect the live state of a timeline
/// clock against the wall clock.
///
/// The correlation is sampled from the two clocks whenever a Control
/// Timestamp is needed; the clock's availability maps to timeline
/// availability. The speed normally comes from the timeline clock itself,
/// but a separate speed-source clock can be given when speed is controlled
/// on an ancestor (e.g. one master timeline clock with per-scale children).
pub struct ClockTimelineSource {
    timeline_selector: String,
    wall_clock: Arc<Clock>,
    clock: Arc<Clock>,
    speed_source: Arc<Clock>,
}

impl ClockTimelineSource {
    pub fn new(
        timeline_selector: impl Into<String>,
        wall_clock: Arc<Clock>,
        clock: Arc<Clock>,
    ) -> Arc<Self> {
        let speed_source = clock.clone();
        Arc::new(Self {
            timeline_selector: timeline_selector.into(),
            wall_clock,
            clock,
            speed_source,
        })
    }

    pub fn with_speed_source(
        timeline_selector: impl Into<String>,
        wall_clock: Arc<Clock>,
        clock: Arc<Clock>,
        speed_source: Arc<Clock>,
    ) -> Arc<Self> {
        Arc::new(Self {
            timeline_selector: timeline_selector.into(),
            wall_clock,
            clock,
            speed_source,
        })
    }
}

impl TimelineSource for ClockTimelineSource {
    fn recognises_timeline_selector(&self, timeline_selector: &str) -> bool {
        self.timeline_selector == timeline_selector
    }

    fn control_timestamp(&self, _timeline_selector: &str) -> Option<ControlTimestamp> {
        let wall_now = bigint_from_ticks(self.wall_clock.ticks());
        if self.clock.is_available() {
            Some(ControlTimestamp::new(
                bigint_from_ticks(self.clock.ticks()),
                wall_now,
                self.speed_source.speed(),
            ))
        } else {
            Some(ControlTimestamp::unavailable(wall_now))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_clocks::testing::MockTimeSource;
    use lockstep_clocks::Correlation;

    fn wall_and_timeline() -> (Arc<MockTimeSource>, Arc<Clock>, Arc<Clock>) {
        let source = MockTimeSource::new(0.0);
        source.enable_auto_increment(0.000001, 1);
        let sys = Clock::system(source.clone(), 1e9).unwrap();
        source.disable_auto_increment();
        let wall_clock = Clock::correlated(&sys, 1e9, Correlation::new(0.0, 0.0)).unwrap();
        let pts = Clock::correlated(&wall_clock, 90_000.0, Correlation::new(0.0, 0.0)).unwrap();
        (source, wall_clock, pts)
    }

    #[test]
    fn clock_source_samples_both_clocks() {
        let (source, wall_clock, pts) = wall_and_timeline();
        let timeline = ClockTimelineSource::new(
            "urn:dvb:css:timeline:pts",
            wall_clock.clone(),
            pts.clone(),
        );

        source.set_now(10.0);
        let ct = timeline
            .control_timestamp("urn:dvb:css:timeline:pts")
            .unwrap();
        assert!(ct.is_available());
        assert_eq!(
            ct.timestamp.content_time.as_ref().unwrap().to_string(),
            "900000"
        );
        assert_eq!(ct.timeline_speed_multiplier, Some(1.0));
    }

    #[test]
    fn unavailable_clock_yields_null_control_timestamp() {
        let (_source, wall_clock, pts) = wall_and_timeline();
        pts.set_availability(false).unwrap();
        let timeline = ClockTimelineSource::new("urn:pts", wall_clock, pts);

        let ct = timeline.control_timestamp("urn:pts").unwrap();
        assert!(!ct.is_available());
        assert_eq!(ct.timeline_speed_multiplier, None);
    }

    #[test]
    fn speed_can_come_from_a_different_clock() {
        let (_source, wall_clock, pts) = wall_and_timeline();
        let master = Clock::correlated(&wall_clock, 1000.0, Correlation::new(0.0, 0.0)).unwrap();
        master.set_speed(2.0).unwrap();

        let timeline = ClockTimelineSource::with_speed_source(
            "urn:pts",
            wall_clock,
            pts,
            master,
        );
        let ct = timeline.control_timestamp("urn:pts").unwrap();
        assert_eq!(ct.timeline_speed_multiplier, Some(2.0));
    }
}
