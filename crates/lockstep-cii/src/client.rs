//! The CII client: mirror the server's state and report changes.

use std::sync::{Arc, Mutex};

use lockstep_wire::Cii;
use lockstep_ws::{WsClientConnection, WsClientHandler, WsResult, CLOSE_GOING_AWAY};
use tracing::{debug, warn};

/// Observer of a [`CiiClient`]'s connection and state changes.
///
/// Callbacks run on the connection's reader thread, in arrival order.
pub trait CiiClientObserver: Send + 'static {
    fn on_connected(&mut self) {}

    fn on_disconnected(&mut self, _code: Option<u16>) {}

    /// Every received message, before change detection. Prefer
    /// [`CiiClientObserver::on_change`].
    fn on_cii_received(&mut self, _cii: &Cii) {}

    /// One field of the mirrored state changed value.
    fn on_field_change(&mut self, _field: &'static str, _state: &Cii) {}

    /// A received message changed at least one field; `changed` lists the
    /// field names.
    fn on_change(&mut self, _changed: &[&'static str], _state: &Cii) {}

    /// A malformed or non-text message arrived. The connection stays open.
    fn on_protocol_error(&mut self, description: &str) {
        warn!(description, "CII protocol error");
    }
}

struct Shared {
    state: Mutex<Cii>,
    latest: Mutex<Option<Cii>>,
}

struct Handler {
    shared: Arc<Shared>,
    observer: Box<dyn CiiClientObserver>,
}

impl WsClientHandler for Handler {
    fn on_open(&mut self) {
        debug!("CII connection open");
        self.observer.on_connected();
    }

    fn on_text(&mut self, message: &str) {
        let incoming = match Cii::unpack(message) {
            Ok(cii) => cii,
            Err(e) => {
                self.observer
                    .on_protocol_error(&format!("unparseable CII message: {e}"));
                return;
            }
        };
        *self.shared.latest.lock().unwrap() = Some(incoming.clone());
        self.observer.on_cii_received(&incoming);

        // The message may be a full state or a diff; either way, fields it
        // omits leave the local state untouched.
        let mut state = self.shared.state.lock().unwrap();
        let changes = Cii::diff(&state, &incoming);
        let changed = changes.defined_fields();
        if changed.is_empty() {
            debug!("no fields changed");
            return;
        }
        state.update(&changes);
        let snapshot = state.clone();
        drop(state);

        debug!(?changed, "CII state changed");
        for field in &changed {
            self.observer.on_field_change(field, &snapshot);
        }
        self.observer.on_change(&changed, &snapshot);
    }

    fn on_close(&mut self, code: Option<u16>) {
        debug!(?code, "CII connection closed");
        self.observer.on_disconnected(code);
    }

    fn on_protocol_error(&mut self, description: &str) {
        self.observer.on_protocol_error(description);
    }
}

/// A CII protocol client.
///
/// Connects to a server's CII endpoint, keeps a local mirror of the
/// server's state, and notifies the observer of every change.
pub struct CiiClient {
    connection: WsClientConnection,
    shared: Arc<Shared>,
}

impl CiiClient {
    /// Connect to a `ws://` CII endpoint.
    pub fn connect(url: &str, observer: Box<dyn CiiClientObserver>) -> WsResult<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(Cii::default()),
            latest: Mutex::new(None),
        });
        let handler = Box::new(Handler {
            shared: shared.clone(),
            observer,
        });
        let connection = WsClientConnection::connect(url, handler)?;
        Ok(Self { connection, shared })
    }

    /// A snapshot of the mirrored server state.
    pub fn cii(&self) -> Cii {
        self.shared.state.lock().unwrap().clone()
    }

    /// The most recently received message, verbatim.
    pub fn latest_cii(&self) -> Option<Cii> {
        self.shared.latest.lock().unwrap().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn disconnect(&self) {
        self.connection.disconnect(CLOSE_GOING_AWAY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_wire::{ContentIdStatus, Field};

    #[derive(Default)]
    struct Recorded {
        field_changes: Vec<&'static str>,
        aggregate_changes: Vec<Vec<&'static str>>,
        protocol_errors: usize,
    }

    #[derive(Default)]
    struct RecordingObserver {
        recorded: Arc<Mutex<Recorded>>,
    }

    impl CiiClientObserver for RecordingObserver {
        fn on_field_change(&mut self, field: &'static str, _state: &Cii) {
            self.recorded.lock().unwrap().field_changes.push(field);
        }
        fn on_change(&mut self, changed: &[&'static str], _state: &Cii) {
            self.recorded
                .lock()
                .unwrap()
                .aggregate_changes
                .push(changed.to_vec());
        }
        fn on_protocol_error(&mut self, _description: &str) {
            self.recorded.lock().unwrap().protocol_errors += 1;
        }
    }

    fn handler() -> (Handler, Arc<Shared>, Arc<Mutex<Recorded>>) {
        let shared = Arc::new(Shared {
            state: Mutex::new(Cii::default()),
            latest: Mutex::new(None),
        });
        let observer = RecordingObserver::default();
        let recorded = observer.recorded.clone();
        let handler = Handler {
            shared: shared.clone(),
            observer: Box::new(observer),
        };
        (handler, shared, recorded)
    }

    #[test]
    fn received_fields_update_state_and_fire_callbacks() {
        let (mut handler, shared, recorded) = handler();

        handler.on_text(r#"{"contentId":"dvb://X","contentIdStatus":"partial"}"#);

        let state = shared.state.lock().unwrap().clone();
        assert_eq!(state.content_id, Field::Value("dvb://X".to_string()));
        assert_eq!(
            state.content_id_status,
            Field::Value(ContentIdStatus::Partial)
        );
        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.field_changes, vec!["contentId", "contentIdStatus"]);
        assert_eq!(
            recorded.aggregate_changes,
            vec![vec!["contentId", "contentIdStatus"]]
        );
    }

    #[test]
    fn omitted_fields_leave_local_state_untouched() {
        let (mut handler, shared, recorded) = handler();

        handler.on_text(r#"{"contentId":"dvb://X","contentIdStatus":"partial"}"#);
        // A diff that only mentions contentId must not clear the status.
        handler.on_text(r#"{"contentId":"dvb://Y"}"#);

        let state = shared.state.lock().unwrap().clone();
        assert_eq!(state.content_id, Field::Value("dvb://Y".to_string()));
        assert_eq!(
            state.content_id_status,
            Field::Value(ContentIdStatus::Partial)
        );
        assert_eq!(
            recorded.lock().unwrap().aggregate_changes[1],
            vec!["contentId"]
        );
    }

    #[test]
    fn unchanged_message_fires_no_callbacks() {
        let (mut handler, _shared, recorded) = handler();

        handler.on_text(r#"{"contentId":"dvb://X"}"#);
        handler.on_text(r#"{"contentId":"dvb://X"}"#);

        assert_eq!(recorded.lock().unwrap().aggregate_changes.len(), 1);
    }

    #[test]
    fn malformed_message_is_reported_and_state_survives() {
        let (mut handler, shared, recorded) = handler();

        handler.on_text(r#"{"contentId":"dvb://X"}"#);
        handler.on_text("not json at all");
        handler.on_text(r#"{"contentIdStatus":"bogus"}"#);

        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.protocol_errors, 2);
        let state = shared.state.lock().unwrap().clone();
        assert_eq!(state.content_id, Field::Value("dvb://X".to_string()));
    }

    #[test]
    fn explicit_null_clears_a_field() {
        let (mut handler, shared, _recorded) = handler();

        handler.on_text(r#"{"mrsUrl":"http://mrs.example"}"#);
        handler.on_text(r#"{"mrsUrl":null}"#);

        let state = shared.state.lock().unwrap().clone();
        assert_eq!(state.mrs_url, Field::Null);
    }
}
