//! The TS server: per-connection timeline setup and Control Timestamp push.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use lockstep_clocks::Clock;
use lockstep_wire::{AptEptLpt, ControlTimestamp, SetupData};
use lockstep_ws::{
    ConnectionId, ConnectionTable, WsEndpoint, WsResult, WsServer, WsServerConfig,
};
use tracing::{debug, info, warn};

use crate::bigint_from_ticks;
use crate::source::TimelineSource;

/// Observer of per-connection TS server events.
pub trait TsServerObserver: Send + Sync {
    /// A connection completed setup.
    fn on_client_setup(&self, _connection: &str, _setup: &SetupData) {}

    /// A connection reported its presentation timestamps.
    fn on_client_apt_ept_lpt(&self, _connection: &str, _timestamps: &AptEptLpt) {}
}

struct TsConnectionData {
    /// `None` until the SetupData message arrives; until then all other
    /// messages are discarded.
    setup: Option<SetupData>,
    /// The last Control Timestamp pushed to this connection.
    last_control_timestamp: Option<ControlTimestamp>,
    last_apt_ept_lpt: Option<AptEptLpt>,
}

struct TsEndpoint {
    content_id: Mutex<Option<String>>,
    wall_clock: Arc<Clock>,
    sources: Mutex<Vec<Arc<dyn TimelineSource>>>,
    /// How many connections want each selector; the needed/not-needed
    /// source callbacks fire on the 0→1 and 1→0 edges.
    selector_refcounts: Mutex<HashMap<String, usize>>,
    observer: Mutex<Option<Arc<dyn TsServerObserver>>>,
}

impl TsEndpoint {
    /// The Control Timestamp a connection with this setup should currently
    /// be seeing, or `None` when a source asks for nothing to be sent yet.
    ///
    /// When no source applies (or the content id no longer matches the
    /// stem) this is the unavailable form stamped with the current wall
    /// clock time, superseding anything sent before.
    fn evaluate(&self, setup: &SetupData) -> Option<ControlTimestamp> {
        let content_id = self.content_id.lock().unwrap();
        if content_id_matches_stem(content_id.as_deref(), &setup.content_id_stem) {
            let sources = self.sources.lock().unwrap();
            if let Some(source) = sources
                .iter()
                .find(|s| s.recognises_timeline_selector(&setup.timeline_selector))
            {
                return source.control_timestamp(&setup.timeline_selector);
            }
        }
        Some(ControlTimestamp::unavailable(bigint_from_ticks(
            self.wall_clock.ticks(),
        )))
    }

    fn update_connection(
        &self,
        table: &mut ConnectionTable<TsConnectionData>,
        id: ConnectionId,
    ) {
        let Some(entry) = table.get_mut(id) else {
            return;
        };
        let Some(setup) = entry.data.setup.clone() else {
            return;
        };
        let Some(latest) = self.evaluate(&setup) else {
            debug!(connection = %entry.handle.name(), "source not ready, sending nothing");
            return;
        };
        if !is_control_timestamp_changed(entry.data.last_control_timestamp.as_ref(), &latest) {
            return;
        }
        match latest.pack() {
            Ok(text) => {
                debug!(connection = %entry.handle.name(), "sending Control Timestamp");
                entry.handle.send_text(text);
                entry.data.last_control_timestamp = Some(latest);
            }
            Err(e) => warn!(error = %e, "failed to encode Control Timestamp"),
        }
    }

    fn selector_needed(&self, timeline_selector: &str) {
        let mut refcounts = self.selector_refcounts.lock().unwrap();
        let count = refcounts
            .entry(timeline_selector.to_string())
            .or_insert(0);
        *count += 1;
        if *count == 1 {
            for source in self.sources.lock().unwrap().iter() {
                source.timeline_selector_needed(timeline_selector);
            }
        }
    }

    fn selector_not_needed(&self, timeline_selector: &str) {
        let mut refcounts = self.selector_refcounts.lock().unwrap();
        if let Some(count) = refcounts.get_mut(timeline_selector) {
            *count -= 1;
            if *count == 0 {
                refcounts.remove(timeline_selector);
                for source in self.sources.lock().unwrap().iter() {
                    source.timeline_selector_not_needed(timeline_selector);
                }
            }
        }
    }
}

impl WsEndpoint for TsEndpoint {
    type ConnectionData = TsConnectionData;

    fn connection_id_prefix(&self) -> &'static str {
        "ts"
    }

    fn initial_connection_data(&self) -> TsConnectionData {
        TsConnectionData {
            setup: None,
            last_control_timestamp: None,
            last_apt_ept_lpt: None,
        }
    }

    fn on_client_connect(
        &self,
        table: &mut ConnectionTable<TsConnectionData>,
        id: ConnectionId,
    ) {
        if let Some(entry) = table.get_mut(id) {
            info!(connection = %entry.handle.name(), "client connected, awaiting setup");
        }
    }

    fn on_client_message(
        &self,
        table: &mut ConnectionTable<TsConnectionData>,
        id: ConnectionId,
        message: &str,
    ) {
        let Some(entry) = table.get_mut(id) else {
            return;
        };
        let name = entry.handle.name().to_string();

        if entry.data.setup.is_none() {
            // State A: the first message must be SetupData.
            let setup = match SetupData::unpack(message) {
                Ok(setup) => setup,
                Err(e) => {
                    info!(connection = %name, error = %e, "expected a SetupData message, discarding");
                    return;
                }
            };
            info!(
                connection = %name,
                timeline_selector = %setup.timeline_selector,
                content_id_stem = %setup.content_id_stem,
                "client setup"
            );
            entry.data.setup = Some(setup.clone());
            self.selector_needed(&setup.timeline_selector);
            if let Some(observer) = self.observer.lock().unwrap().clone() {
                observer.on_client_setup(&name, &setup);
            }
            // First Control Timestamp, if one is derivable yet.
            self.update_connection(table, id);
        } else {
            // State B: everything further is AptEptLpt.
            let timestamps = match AptEptLpt::unpack(message) {
                Ok(timestamps) => timestamps,
                Err(e) => {
                    info!(connection = %name, error = %e, "expected an AptEptLpt message, discarding");
                    return;
                }
            };
            entry.data.last_apt_ept_lpt = Some(timestamps.clone());
            if let Some(observer) = self.observer.lock().unwrap().clone() {
                observer.on_client_apt_ept_lpt(&name, &timestamps);
            }
        }
    }

    fn on_client_disconnect(&self, _id: ConnectionId, data: TsConnectionData) {
        if let Some(setup) = data.setup {
            self.selector_not_needed(&setup.timeline_selector);
        }
    }
}

/// A TS protocol server.
///
/// Serves the timelines of its attached [`TimelineSource`]s for one content
/// id. Nothing is pushed automatically: after any change (content id,
/// source state, attach/remove), call [`TsServer::update_all_clients`].
pub struct TsServer {
    server: WsServer<TsEndpoint>,
}

impl TsServer {
    /// Bind and start serving timelines for `content_id`.
    pub fn start(
        config: WsServerConfig,
        content_id: Option<String>,
        wall_clock: Arc<Clock>,
    ) -> WsResult<Self> {
        let server = WsServer::start(
            config,
            TsEndpoint {
                content_id: Mutex::new(content_id),
                wall_clock,
                sources: Mutex::new(Vec::new()),
                selector_refcounts: Mutex::new(HashMap::new()),
                observer: Mutex::new(None),
            },
        )?;
        Ok(Self { server })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    pub fn content_id(&self) -> Option<String> {
        self.server.endpoint().content_id.lock().unwrap().clone()
    }

    /// Change the content id timelines are served for. Whether each
    /// connection's stem still matches is re-evaluated on the next update.
    pub fn set_content_id(&self, content_id: Option<String>) {
        *self.server.endpoint().content_id.lock().unwrap() = content_id;
    }

    /// Attach a source of timelines, making them available to matching
    /// clients on the next update.
    pub fn attach_timeline_source(&self, source: Arc<dyn TimelineSource>) {
        source.sink_attached();
        self.server.endpoint().sources.lock().unwrap().push(source);
    }

    /// Remove a previously attached source (by identity).
    pub fn remove_timeline_source(&self, source: &Arc<dyn TimelineSource>) {
        let mut sources = self.server.endpoint().sources.lock().unwrap();
        if let Some(index) = sources.iter().position(|s| Arc::ptr_eq(s, source)) {
            let removed = sources.remove(index);
            removed.sink_detached();
        }
    }

    pub fn set_observer(&self, observer: Arc<dyn TsServerObserver>) {
        *self.server.endpoint().observer.lock().unwrap() = Some(observer);
    }

    /// Re-evaluate every connection and send a Control Timestamp to each
    /// one whose current evaluation differs from what it last saw.
    pub fn update_all_clients(&self) {
        let endpoint = self.server.endpoint();
        self.server.with_connections(|table| {
            for id in table.ids() {
                endpoint.update_connection(table, id);
            }
        });
    }

    pub fn is_enabled(&self) -> bool {
        self.server.is_enabled()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.server.set_enabled(enabled);
    }

    pub fn connection_count(&self) -> usize {
        self.server.connection_count()
    }

    pub fn stop(&self) {
        self.server.stop();
    }
}

/// A stem matches when the content identifier starts with it. No content
/// id matches nothing (not even the empty stem).
fn content_id_matches_stem(content_id: Option<&str>, stem: &str) -> bool {
    content_id.map_or(false, |ci| ci.starts_with(stem))
}

/// Whether `latest` needs sending given the previously sent Control
/// Timestamp.
///
/// This compares field values, not timing equivalence, with one exception:
/// two "timeline unavailable" timestamps differing only in their wall clock
/// times count as unchanged.
fn is_control_timestamp_changed(
    previous: Option<&ControlTimestamp>,
    latest: &ControlTimestamp,
) -> bool {
    let Some(previous) = previous else {
        return true;
    };
    if previous.timestamp.content_time.is_none() && latest.timestamp.content_time.is_none() {
        return false;
    }
    previous != latest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SimpleTimelineSource;
    use lockstep_clocks::testing::MockTimeSource;

    fn wall_clock() -> Arc<Clock> {
        let source = MockTimeSource::new(0.0);
        source.enable_auto_increment(0.000001, 1);
        let sys = Clock::system(source.clone(), 1e9).unwrap();
        source.disable_auto_increment();
        sys
    }

    fn endpoint_with(content_id: Option<&str>, sources: Vec<Arc<dyn TimelineSource>>) -> TsEndpoint {
        TsEndpoint {
            content_id: Mutex::new(content_id.map(str::to_string)),
            wall_clock: wall_clock(),
            sources: Mutex::new(sources),
            selector_refcounts: Mutex::new(HashMap::new()),
            observer: Mutex::new(None),
        }
    }

    #[test]
    fn stem_matching() {
        assert!(content_id_matches_stem(Some("dvb://1004.5678"), "dvb://"));
        assert!(content_id_matches_stem(Some("dvb://1004"), "dvb://1004"));
        assert!(content_id_matches_stem(Some("dvb://1004"), ""));
        assert!(!content_id_matches_stem(Some("dvb://1004"), "dvb://2000"));
        assert!(!content_id_matches_stem(None, ""));
    }

    #[test]
    fn first_recognising_source_wins() {
        let first = SimpleTimelineSource::new("urn:pts", Some(ControlTimestamp::new(1, 2, 1.0)));
        let second = SimpleTimelineSource::new("urn:pts", Some(ControlTimestamp::new(9, 9, 9.0)));
        let endpoint = endpoint_with(Some("dvb://1"), vec![first, second]);

        let ct = endpoint
            .evaluate(&SetupData::new("dvb://", "urn:pts"))
            .unwrap();
        assert_eq!(ct, ControlTimestamp::new(1, 2, 1.0));
    }

    #[test]
    fn no_matching_source_yields_unavailable() {
        let endpoint = endpoint_with(Some("dvb://1"), vec![]);
        let ct = endpoint
            .evaluate(&SetupData::new("dvb://", "urn:pts"))
            .unwrap();
        assert!(!ct.is_available());
    }

    #[test]
    fn stem_mismatch_supersedes_the_source() {
        let source = SimpleTimelineSource::new("urn:pts", Some(ControlTimestamp::new(1, 2, 1.0)));
        let endpoint = endpoint_with(Some("dvb://other"), vec![source]);
        let ct = endpoint
            .evaluate(&SetupData::new("dvb://1004", "urn:pts"))
            .unwrap();
        assert!(!ct.is_available());
    }

    #[test]
    fn source_can_withhold_the_first_timestamp() {
        let source = SimpleTimelineSource::new("urn:pts", None);
        let endpoint = endpoint_with(Some("dvb://1"), vec![source]);
        assert!(endpoint
            .evaluate(&SetupData::new("dvb://", "urn:pts"))
            .is_none());
    }

    #[test]
    fn change_detection_rules() {
        let a = ControlTimestamp::new(100, 200, 1.0);
        assert!(is_control_timestamp_changed(None, &a));
        assert!(!is_control_timestamp_changed(Some(&a), &a.clone()));

        // Any field difference counts.
        let b = ControlTimestamp::new(101, 200, 1.0);
        assert!(is_control_timestamp_changed(Some(&a), &b));
        let c = ControlTimestamp::new(100, 201, 1.0);
        assert!(is_control_timestamp_changed(Some(&a), &c));
        let d = ControlTimestamp::new(100, 200, 2.0);
        assert!(is_control_timestamp_changed(Some(&a), &d));

        // Except that two unavailable timestamps are the same statement
        // regardless of when they were made.
        let gone_early = ControlTimestamp::unavailable(500);
        let gone_late = ControlTimestamp::unavailable(900);
        assert!(!is_control_timestamp_changed(Some(&gone_early), &gone_late));
        assert!(is_control_timestamp_changed(Some(&gone_early), &a));
    }

    #[test]
    fn selector_refcounting_fires_on_edges() {
        use std::sync::atomic::{AtomicI32, Ordering};

        #[derive(Default)]
        struct CountingSource {
            needed: AtomicI32,
        }
        impl TimelineSource for CountingSource {
            fn recognises_timeline_selector(&self, _s: &str) -> bool {
                true
            }
            fn control_timestamp(&self, _s: &str) -> Option<ControlTimestamp> {
                None
            }
            fn timeline_selector_needed(&self, _s: &str) {
                self.needed.fetch_add(1, Ordering::SeqCst);
            }
            fn timeline_selector_not_needed(&self, _s: &str) {
                self.needed.fetch_sub(1, Ordering::SeqCst);
            }
        }

        let source = Arc::new(CountingSource::default());
        let endpoint = endpoint_with(Some("dvb://1"), vec![source.clone()]);

        endpoint.selector_needed("urn:pts");
        endpoint.selector_needed("urn:pts");
        assert_eq!(source.needed.load(Ordering::SeqCst), 1);

        endpoint.selector_not_needed("urn:pts");
        assert_eq!(source.needed.load(Ordering::SeqCst), 1);
        endpoint.selector_not_needed("urn:pts");
        assert_eq!(source.needed.load(Ordering::SeqCst), 0);
    }
}
