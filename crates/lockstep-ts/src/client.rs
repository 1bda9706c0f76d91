//! The TS client: drive a correlated timeline clock from received Control
//! Timestamps.

use std::sync::{Arc, Mutex};

use lockstep_clocks::{Clock, Correlation};
use lockstep_wire::{AptEptLpt, ControlTimestamp, SetupData, Timestamp, WallClockTime};
use lockstep_ws::{WsClientConnection, WsClientHandler, WsResult, CLOSE_GOING_AWAY};
use num_traits::ToPrimitive;
use tracing::{debug, warn};

use crate::bigint_from_ticks;

/// Observer of a [`TsClientController`]'s connection and timeline events.
///
/// Callbacks run on the connection's reader thread, in arrival order.
pub trait TsClientObserver: Send + 'static {
    fn on_connected(&mut self) {}

    fn on_disconnected(&mut self, _code: Option<u16>) {}

    /// The timeline clock's correlation or speed was adjusted.
    fn on_timing_change(&mut self, _speed_changed: bool) {}

    fn on_timeline_available(&mut self) {}

    fn on_timeline_unavailable(&mut self) {}

    /// A malformed or non-text message arrived. The connection stays open.
    fn on_protocol_error(&mut self, description: &str) {
        warn!(description, "TS protocol error");
    }
}

/// Configuration of a [`TsClientController`].
pub struct TsClientConfig {
    /// Content id stem sent in the SetupData message.
    pub content_id_stem: String,
    /// Timeline selector sent in the SetupData message.
    pub timeline_selector: String,
    /// Minimum timing change, in seconds, that will move the timeline
    /// clock. Smaller adjustments are ignored.
    pub correlation_change_threshold_secs: f64,
    /// Clock expressing the earliest presentation timing this client can
    /// achieve, used for AptEptLpt reports.
    pub earliest_clock: Option<Arc<Clock>>,
    /// Clock expressing the latest achievable presentation timing.
    pub latest_clock: Option<Arc<Clock>>,
}

impl TsClientConfig {
    pub fn new(content_id_stem: impl Into<String>, timeline_selector: impl Into<String>) -> Self {
        Self {
            content_id_stem: content_id_stem.into(),
            timeline_selector: timeline_selector.into(),
            correlation_change_threshold_secs: 0.0001,
            earliest_clock: None,
            latest_clock: None,
        }
    }
}

struct Shared {
    timeline_clock: Arc<Clock>,
    threshold_secs: f64,
    latest_control_timestamp: Mutex<Option<ControlTimestamp>>,
}

impl Shared {
    /// Apply one Control Timestamp to the timeline clock, firing observer
    /// callbacks for what actually changed.
    fn handle_control_timestamp(
        &self,
        observer: &mut dyn TsClientObserver,
        control_timestamp: ControlTimestamp,
    ) {
        let available = control_timestamp.is_available();
        let availability_changed = available != self.timeline_clock.is_available();

        // Only derive a candidate correlation when the timeline is actually
        // available.
        let mut timing_changed = false;
        let mut speed_changed = false;
        let mut adopted: Option<(Correlation, f64)> = None;
        if available {
            let speed = control_timestamp.timeline_speed_multiplier.unwrap_or(1.0);
            let content_time = control_timestamp
                .timestamp
                .content_time
                .as_ref()
                .and_then(ToPrimitive::to_f64)
                .unwrap_or(f64::NAN);
            let correlation = Correlation::new(
                control_timestamp.timestamp.wall_clock_time.to_f64(),
                content_time,
            );
            timing_changed = self
                .timeline_clock
                .is_change_significant(&correlation, speed, self.threshold_secs)
                .unwrap_or(false);
            speed_changed = self.timeline_clock.speed() != speed;
            if timing_changed {
                adopted = Some((correlation, speed));
            }
        }

        // Correlation and speed first, then availability, so downstream
        // observers of the clock see availability reflect the updated
        // timing.
        if let Some((correlation, speed)) = adopted {
            let _ = self
                .timeline_clock
                .set_correlation_and_speed(correlation, speed);
        }
        if availability_changed {
            let _ = self.timeline_clock.set_availability(available);
        }

        *self.latest_control_timestamp.lock().unwrap() = Some(control_timestamp);

        if available && timing_changed {
            debug!(speed_changed, "timeline timing adjusted");
            observer.on_timing_change(speed_changed);
        }
        if availability_changed {
            if available {
                debug!("timeline became available");
                observer.on_timeline_available();
            } else {
                debug!("timeline became unavailable");
                observer.on_timeline_unavailable();
            }
        }
    }
}

struct Handler {
    shared: Arc<Shared>,
    observer: Box<dyn TsClientObserver>,
}

impl WsClientHandler for Handler {
    fn on_open(&mut self) {
        debug!("TS connection open");
        self.observer.on_connected();
    }

    fn on_text(&mut self, message: &str) {
        match ControlTimestamp::unpack(message) {
            Ok(control_timestamp) => {
                self.shared
                    .handle_control_timestamp(self.observer.as_mut(), control_timestamp);
            }
            Err(e) => {
                self.observer
                    .on_protocol_error(&format!("unparseable Control Timestamp: {e}"));
            }
        }
    }

    fn on_close(&mut self, code: Option<u16>) {
        if self.shared.timeline_clock.is_available() {
            let _ = self.shared.timeline_clock.set_availability(false);
            self.observer.on_timeline_unavailable();
        }
        self.observer.on_disconnected(code);
    }

    fn on_protocol_error(&mut self, description: &str) {
        self.observer.on_protocol_error(description);
    }
}

/// A TS protocol client that keeps a timeline clock synchronised.
///
/// The timeline clock must be a correlated clock whose parent represents
/// the wall clock (keep that synchronised with a wall-clock client against
/// the same television). Its tick rate must match the selected timeline's.
/// While connected, the controller adjusts the clock's correlation, speed
/// and availability to mirror the television's timeline.
pub struct TsClientController {
    connection: Arc<WsClientConnection>,
    shared: Arc<Shared>,
    config_earliest: Option<Arc<Clock>>,
    config_latest: Option<Arc<Clock>>,
}

impl TsClientController {
    /// Connect to a `ws://` TS endpoint; the SetupData message is sent as
    /// soon as the connection opens.
    pub fn connect(
        url: &str,
        config: TsClientConfig,
        timeline_clock: Arc<Clock>,
        observer: Box<dyn TsClientObserver>,
    ) -> WsResult<Self> {
        let shared = Arc::new(Shared {
            timeline_clock,
            threshold_secs: config.correlation_change_threshold_secs,
            latest_control_timestamp: Mutex::new(None),
        });
        let handler = Box::new(Handler {
            shared: shared.clone(),
            observer,
        });
        let setup = SetupData::new(config.content_id_stem, config.timeline_selector);

        let connection = Arc::new(WsClientConnection::connect(url, handler)?);
        // Outgoing frames are queued and written by the reader thread, so
        // queueing the setup here makes it the first frame on the wire.
        connection.send_text(setup.pack())?;

        Ok(Self {
            connection,
            shared,
            config_earliest: config.earliest_clock,
            config_latest: config.latest_clock,
        })
    }

    /// The timeline clock this controller drives.
    pub fn timeline_clock(&self) -> Arc<Clock> {
        self.shared.timeline_clock.clone()
    }

    /// Whether the most recent Control Timestamp declared the timeline
    /// available.
    pub fn timeline_available(&self) -> bool {
        self.shared
            .latest_control_timestamp
            .lock()
            .unwrap()
            .as_ref()
            .map_or(false, ControlTimestamp::is_available)
    }

    /// The most recently received Control Timestamp.
    pub fn latest_control_timestamp(&self) -> Option<ControlTimestamp> {
        self.shared.latest_control_timestamp.lock().unwrap().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Report actual/earliest/latest presentation timings to the server.
    ///
    /// The earliest and latest are taken from the configured limit clocks
    /// while those are available, falling back to the open-ended −∞ / +∞
    /// limits. The actual timing is included only when `include_actual` is
    /// set and the timeline clock is available.
    pub fn send_apt_ept_lpt(&self, include_actual: bool) -> WsResult<()> {
        let now = bigint_from_ticks(self.shared.timeline_clock.ticks());

        let earliest = correlation_timestamp(self.config_earliest.as_ref()).unwrap_or(Timestamp {
            content_time: Some(now.clone()),
            wall_clock_time: WallClockTime::MinusInfinity,
        });
        let latest = correlation_timestamp(self.config_latest.as_ref()).unwrap_or(Timestamp {
            content_time: Some(now),
            wall_clock_time: WallClockTime::PlusInfinity,
        });
        let actual = if include_actual && self.shared.timeline_clock.is_available() {
            correlation_timestamp(Some(&self.shared.timeline_clock))
        } else {
            None
        };

        let message = AptEptLpt {
            actual,
            earliest,
            latest,
        };
        match message.pack() {
            Ok(text) => self.connection.send_text(text),
            Err(e) => {
                warn!(error = %e, "failed to encode AptEptLpt");
                Ok(())
            }
        }
    }

    pub fn disconnect(&self) {
        self.connection.disconnect(CLOSE_GOING_AWAY);
    }
}

/// A timestamp sampled from an available correlated clock: its correlation
/// read back as `(wallClockTime, contentTime)`.
fn correlation_timestamp(clock: Option<&Arc<Clock>>) -> Option<Timestamp> {
    let clock = clock?;
    if !clock.is_available() {
        return None;
    }
    let correlation = clock.correlation()?;
    Some(Timestamp {
        content_time: Some(bigint_from_ticks(correlation.child_ticks)),
        wall_clock_time: WallClockTime::Ticks(bigint_from_ticks(correlation.parent_ticks)),
    })
}
