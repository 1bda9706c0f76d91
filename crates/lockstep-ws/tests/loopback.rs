//! Server/client loopback tests over real sockets.

use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

use lockstep_ws::{
    ConnectionId, ConnectionTable, WsClientConnection, WsClientHandler, WsEndpoint, WsError,
    WsServer, WsServerConfig, CLOSE_GOING_AWAY,
};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Greets each client, then echoes every text frame back.
struct EchoEndpoint;

impl WsEndpoint for EchoEndpoint {
    type ConnectionData = u32;

    fn connection_id_prefix(&self) -> &'static str {
        "echo"
    }

    fn initial_connection_data(&self) -> u32 {
        0
    }

    fn on_client_connect(&self, table: &mut ConnectionTable<u32>, id: ConnectionId) {
        if let Some(entry) = table.get_mut(id) {
            entry.handle.send_text("hello".into());
        }
    }

    fn on_client_message(&self, table: &mut ConnectionTable<u32>, id: ConnectionId, message: &str) {
        if let Some(entry) = table.get_mut(id) {
            entry.data += 1;
            entry.handle.send_text(message.to_string());
        }
    }

    fn on_client_disconnect(&self, _id: ConnectionId, _data: u32) {}
}

#[derive(Debug, PartialEq)]
enum Event {
    Open,
    Text(String),
    Close(Option<u16>),
}

struct Recorder {
    events: Sender<Event>,
}

impl Recorder {
    fn channel() -> (Box<Self>, Receiver<Event>) {
        let (tx, rx) = mpsc::channel();
        (Box::new(Self { events: tx }), rx)
    }
}

impl WsClientHandler for Recorder {
    fn on_open(&mut self) {
        let _ = self.events.send(Event::Open);
    }

    fn on_text(&mut self, message: &str) {
        let _ = self.events.send(Event::Text(message.to_string()));
    }

    fn on_close(&mut self, code: Option<u16>) {
        let _ = self.events.send(Event::Close(code));
    }
}

fn start_server(config: WsServerConfig) -> (WsServer<EchoEndpoint>, String) {
    let server = WsServer::start(config, EchoEndpoint).unwrap();
    let url = format!("ws://{}", server.local_addr());
    (server, url)
}

#[test]
fn server_greets_and_echoes() {
    let (server, url) = start_server(WsServerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        ..WsServerConfig::default()
    });

    let (recorder, events) = Recorder::channel();
    let client = WsClientConnection::connect(&url, recorder).unwrap();

    assert_eq!(events.recv_timeout(RECV_TIMEOUT).unwrap(), Event::Open);
    assert_eq!(
        events.recv_timeout(RECV_TIMEOUT).unwrap(),
        Event::Text("hello".into())
    );

    client.send_text("ping".into()).unwrap();
    assert_eq!(
        events.recv_timeout(RECV_TIMEOUT).unwrap(),
        Event::Text("ping".into())
    );

    client.disconnect(CLOSE_GOING_AWAY);
    server.stop();
}

#[test]
fn disabled_endpoint_rejects_with_403() {
    let (server, url) = start_server(WsServerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        enabled: false,
        ..WsServerConfig::default()
    });

    let (recorder, _events) = Recorder::channel();
    match WsClientConnection::connect(&url, recorder) {
        Err(WsError::Rejected(status)) => assert_eq!(status, 403),
        other => panic!("expected a 403 rejection, got {other:?}"),
    }
    server.stop();
}

#[test]
fn full_endpoint_rejects_with_503() {
    let (server, url) = start_server(WsServerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        max_connections: Some(1),
        ..WsServerConfig::default()
    });

    let (first_recorder, first_events) = Recorder::channel();
    let first = WsClientConnection::connect(&url, first_recorder).unwrap();
    // Wait for the greeting so the first connection is fully registered.
    assert_eq!(first_events.recv_timeout(RECV_TIMEOUT).unwrap(), Event::Open);
    assert_eq!(
        first_events.recv_timeout(RECV_TIMEOUT).unwrap(),
        Event::Text("hello".into())
    );

    let (second_recorder, _second_events) = Recorder::channel();
    match WsClientConnection::connect(&url, second_recorder) {
        Err(WsError::Rejected(status)) => assert_eq!(status, 503),
        other => panic!("expected a 503 rejection, got {other:?}"),
    }

    first.disconnect(CLOSE_GOING_AWAY);
    server.stop();
}

#[test]
fn disabling_closes_connections_with_1001() {
    let (server, url) = start_server(WsServerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        ..WsServerConfig::default()
    });

    let (recorder, events) = Recorder::channel();
    let _client = WsClientConnection::connect(&url, recorder).unwrap();
    assert_eq!(events.recv_timeout(RECV_TIMEOUT).unwrap(), Event::Open);
    assert_eq!(
        events.recv_timeout(RECV_TIMEOUT).unwrap(),
        Event::Text("hello".into())
    );

    server.set_enabled(false);
    assert_eq!(
        events.recv_timeout(RECV_TIMEOUT).unwrap(),
        Event::Close(Some(1001))
    );
    server.stop();
}
