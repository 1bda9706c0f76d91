//! The CII server: push state and diffs to connected companions.

use std::net::SocketAddr;
use std::sync::Mutex;

use lockstep_wire::Cii;
use lockstep_ws::{
    ConnectionId, ConnectionTable, WsEndpoint, WsResult, WsServer, WsServerConfig,
};
use tracing::{debug, info};

struct CiiConnectionData {
    /// What this connection was last sent; diffs are computed against it.
    last_sent: Cii,
}

struct CiiEndpoint {
    state: Mutex<Cii>,
}

impl WsEndpoint for CiiEndpoint {
    type ConnectionData = CiiConnectionData;

    fn connection_id_prefix(&self) -> &'static str {
        "cii"
    }

    fn initial_connection_data(&self) -> CiiConnectionData {
        CiiConnectionData {
            last_sent: Cii::default(),
        }
    }

    /// A new client is sent the full current state straight away.
    fn on_client_connect(
        &self,
        table: &mut ConnectionTable<CiiConnectionData>,
        id: ConnectionId,
    ) {
        let current = self.state.lock().unwrap().clone();
        if let Some(entry) = table.get_mut(id) {
            info!(connection = %entry.handle.name(), "sending initial CII state");
            entry.handle.send_text(current.pack());
            entry.data.last_sent = current;
        }
    }

    /// Clients do not speak on this protocol.
    fn on_client_message(
        &self,
        table: &mut ConnectionTable<CiiConnectionData>,
        id: ConnectionId,
        message: &str,
    ) {
        let name = table
            .get_mut(id)
            .map(|entry| entry.handle.name().to_string())
            .unwrap_or_default();
        info!(connection = %name, message, "ignoring unexpected message");
    }

    fn on_client_disconnect(&self, _id: ConnectionId, _data: CiiConnectionData) {}
}

/// A CII protocol server.
///
/// Update the state with [`CiiServer::update_cii`] (or replace it with
/// [`CiiServer::set_cii`]), then call [`CiiServer::update_clients`] to push
/// the changes out.
pub struct CiiServer {
    server: WsServer<CiiEndpoint>,
}

impl CiiServer {
    /// Bind and start serving, with `initial` as the starting state.
    pub fn start(config: WsServerConfig, initial: Cii) -> WsResult<Self> {
        let server = WsServer::start(
            config,
            CiiEndpoint {
                state: Mutex::new(initial),
            },
        )?;
        Ok(Self { server })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    /// A snapshot of the current state.
    pub fn cii(&self) -> Cii {
        self.server.endpoint().state.lock().unwrap().clone()
    }

    /// Replace the state. Clients are not told until
    /// [`CiiServer::update_clients`] is called.
    pub fn set_cii(&self, cii: Cii) {
        *self.server.endpoint().state.lock().unwrap() = cii;
    }

    /// Mutate the state in place.
    pub fn update_cii(&self, f: impl FnOnce(&mut Cii)) {
        f(&mut self.server.endpoint().state.lock().unwrap());
    }

    /// Push the current state to every connected client.
    ///
    /// With `send_only_diff`, each client receives only the fields that
    /// changed since it was last updated, and nothing at all when no field
    /// changed (unless `send_if_empty` forces a message). Without it, each
    /// client receives the full state.
    pub fn update_clients(&self, send_only_diff: bool, send_if_empty: bool) {
        let current = self.cii();
        self.server.with_connections(|table| {
            for entry in table.iter_mut() {
                let to_send = if send_only_diff {
                    outgoing_diff(&entry.data.last_sent, &current)
                } else {
                    current.clone()
                };
                if send_if_empty || !to_send.is_empty() {
                    debug!(connection = %entry.handle.name(), "sending CII update");
                    entry.handle.send_text(to_send.pack());
                }
                entry.data.last_sent = current.clone();
            }
        });
    }

    pub fn is_enabled(&self) -> bool {
        self.server.is_enabled()
    }

    /// Disabling refuses new connections with HTTP 403 and closes existing
    /// ones with close code 1001.
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

/// The message a client should be sent given what it last saw: the
/// field-wise diff, with `contentIdStatus` forced in whenever `contentId`
/// changed.
fn outgoing_diff(last_sent: &Cii, current: &Cii) -> Cii {
    let mut diff = Cii::diff(last_sent, current);
    if !diff.content_id.is_omit() {
        diff.content_id_status = current.content_id_status.clone();
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_wire::{ContentIdStatus, Field};

    #[test]
    fn changed_content_id_drags_its_status_into_the_diff() {
        let last_sent = Cii {
            content_id: Field::Value("dvb://X".into()),
            content_id_status: Field::Value(ContentIdStatus::Partial),
            ..Cii::default()
        };
        let current = Cii {
            content_id: Field::Value("dvb://Y".into()),
            content_id_status: Field::Value(ContentIdStatus::Partial),
            ..Cii::default()
        };

        let diff = outgoing_diff(&last_sent, &current);
        assert_eq!(diff.content_id, Field::Value("dvb://Y".to_string()));
        assert_eq!(
            diff.content_id_status,
            Field::Value(ContentIdStatus::Partial)
        );
        assert_eq!(diff.defined_fields(), vec!["contentId", "contentIdStatus"]);
    }

    #[test]
    fn unchanged_state_produces_an_empty_diff() {
        let state = Cii {
            content_id: Field::Value("dvb://X".into()),
            ..Cii::default()
        };
        assert!(outgoing_diff(&state, &state).is_empty());
    }

    #[test]
    fn status_change_alone_travels_without_content_id() {
        let last_sent = Cii {
            content_id: Field::Value("dvb://X".into()),
            content_id_status: Field::Value(ContentIdStatus::Partial),
            ..Cii::default()
        };
        let mut current = last_sent.clone();
        current.content_id_status = Field::Value(ContentIdStatus::Final);

        let diff = outgoing_diff(&last_sent, &current);
        assert_eq!(diff.defined_fields(), vec!["contentIdStatus"]);
    }
}
