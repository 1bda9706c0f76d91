//! The blocking WebSocket server base.

use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::StatusCode;
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::protocol::CloseFrame;
use tungstenite::Message;

use crate::config::WsServerConfig;
use crate::error::WsResult;

/// How often an idle connection thread wakes to flush queued outgoing
/// messages and observe shutdown.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// How often the listener thread polls for new connections and shutdown.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Identity of one client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

enum Outgoing {
    Text(String),
    Close,
}

/// A handle through which messages can be pushed to one connection.
///
/// Sends are queued and written by the connection's own thread, so a handle
/// can be used while the connection table is locked.
#[derive(Clone)]
pub struct ClientHandle {
    id: ConnectionId,
    name: Arc<str>,
    sender: Sender<Outgoing>,
}

impl ClientHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Human-readable connection id, `<prefix>-<n>`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a text frame for this connection. A send to a connection that
    /// is going away is silently dropped.
    pub fn send_text(&self, text: String) {
        if self.sender.send(Outgoing::Text(text)).is_err() {
            debug!(connection = %self.name, "send to closing connection dropped");
        }
    }

    fn send_close(&self) {
        let _ = self.sender.send(Outgoing::Close);
    }
}

/// One connection's entry in the table: the send handle plus the protocol
/// state the endpoint keeps for it.
pub struct ConnectionEntry<D> {
    pub handle: ClientHandle,
    pub data: D,
}

/// All open connections of one server, keyed by connection id.
pub struct ConnectionTable<D> {
    map: HashMap<ConnectionId, ConnectionEntry<D>>,
}

impl<D> ConnectionTable<D> {
    fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut ConnectionEntry<D>> {
        self.map.get_mut(&id)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ConnectionEntry<D>> {
        self.map.values_mut()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.map.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// A protocol endpoint hosted on a [`WsServer`].
///
/// Callbacks run with the server's connection table locked; use the
/// [`ClientHandle`]s in the table to push messages. Do not block in a
/// callback.
pub trait WsEndpoint: Send + Sync + 'static {
    /// Per-connection protocol state.
    type ConnectionData: Send + 'static;

    /// Prefix used for human-readable connection ids.
    fn connection_id_prefix(&self) -> &'static str {
        "serverbase"
    }

    /// State for a connection that has just been accepted.
    fn initial_connection_data(&self) -> Self::ConnectionData;

    /// A client connected; its entry is already in the table.
    fn on_client_connect(
        &self,
        table: &mut ConnectionTable<Self::ConnectionData>,
        id: ConnectionId,
    );

    /// A text frame arrived from a client.
    fn on_client_message(
        &self,
        table: &mut ConnectionTable<Self::ConnectionData>,
        id: ConnectionId,
        message: &str,
    );

    /// A client disconnected; its entry has been removed from the table.
    fn on_client_disconnect(&self, id: ConnectionId, data: Self::ConnectionData);

    /// The client broke the protocol (e.g. sent a binary frame). The
    /// connection stays open.
    fn on_protocol_violation(&self, id: ConnectionId, description: &str) {
        warn!(?id, description, "protocol violation");
    }
}

struct ServerCore<E: WsEndpoint> {
    endpoint: E,
    connections: Mutex<ConnectionTable<E::ConnectionData>>,
    enabled: AtomicBool,
    max_connections: Option<usize>,
    next_connection: AtomicU64,
    stopping: AtomicBool,
}

impl<E: WsEndpoint> ServerCore<E> {
    /// Close every connection with code 1001 and fire the disconnect
    /// callback for each.
    fn close_all(&self) {
        let removed: Vec<(ConnectionId, ConnectionEntry<E::ConnectionData>)> = {
            let mut table = self.connections.lock().unwrap();
            for entry in table.map.values() {
                entry.handle.send_close();
            }
            table.map.drain().collect()
        };
        for (id, entry) in removed {
            self.endpoint.on_client_disconnect(id, entry.data);
        }
    }
}

/// A WebSocket server hosting one protocol endpoint.
pub struct WsServer<E: WsEndpoint> {
    core: Arc<ServerCore<E>>,
    local_addr: SocketAddr,
    listener_thread: Mutex<Option<JoinHandle<()>>>,
    connection_threads: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl<E: WsEndpoint> WsServer<E> {
    /// Bind and start accepting connections for `endpoint`.
    pub fn start(config: WsServerConfig, endpoint: E) -> WsResult<Self> {
        let listener = TcpListener::bind(config.bind_addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let core = Arc::new(ServerCore {
            endpoint,
            connections: Mutex::new(ConnectionTable::new()),
            enabled: AtomicBool::new(config.enabled),
            max_connections: config.max_connections,
            next_connection: AtomicU64::new(0),
            stopping: AtomicBool::new(false),
        });
        let connection_threads: Arc<Mutex<Vec<JoinHandle<()>>>> =
            Arc::new(Mutex::new(Vec::new()));

        let accept_core = core.clone();
        let accept_threads = connection_threads.clone();
        let listener_thread = std::thread::Builder::new()
            .name("lockstep-ws-accept".into())
            .spawn(move || {
                accept_loop(&listener, &accept_core, &accept_threads);
            })?;

        Ok(Self {
            core,
            local_addr,
            listener_thread: Mutex::new(Some(listener_thread)),
            connection_threads,
        })
    }

    /// The address the listener is actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The protocol endpoint hosted by this server.
    pub fn endpoint(&self) -> &E {
        &self.core.endpoint
    }

    pub fn is_enabled(&self) -> bool {
        self.core.enabled.load(Ordering::SeqCst)
    }

    /// Enable or disable the endpoint. Disabling refuses new upgrades with
    /// HTTP 403 and closes every open connection with close code 1001.
    pub fn set_enabled(&self, enabled: bool) {
        self.core.enabled.store(enabled, Ordering::SeqCst);
        if !enabled {
            info!("endpoint disabled, closing connections");
            self.core.close_all();
        }
    }

    pub fn connection_count(&self) -> usize {
        self.core.connections.lock().unwrap().len()
    }

    /// Run `f` with the connection table locked, e.g. to push updates to
    /// every client.
    pub fn with_connections<R>(
        &self,
        f: impl FnOnce(&mut ConnectionTable<E::ConnectionData>) -> R,
    ) -> R {
        f(&mut self.core.connections.lock().unwrap())
    }

    /// Stop accepting, close every connection, and join all threads.
    pub fn stop(&self) {
        self.core.stopping.store(true, Ordering::SeqCst);
        self.core.close_all();
        if let Some(handle) = self.listener_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        let threads: Vec<JoinHandle<()>> =
            std::mem::take(&mut *self.connection_threads.lock().unwrap());
        for handle in threads {
            let _ = handle.join();
        }
    }
}

impl<E: WsEndpoint> Drop for WsServer<E> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop<E: WsEndpoint>(
    listener: &TcpListener,
    core: &Arc<ServerCore<E>>,
    threads: &Arc<Mutex<Vec<JoinHandle<()>>>>,
) {
    while !core.stopping.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                let conn_core = core.clone();
                let spawned = std::thread::Builder::new()
                    .name("lockstep-ws-conn".into())
                    .spawn(move || run_connection(&conn_core, stream, peer));
                match spawned {
                    Ok(handle) => threads.lock().unwrap().push(handle),
                    Err(e) => warn!(error = %e, "failed to spawn connection thread"),
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                std::thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

fn run_connection<E: WsEndpoint>(
    core: &Arc<ServerCore<E>>,
    stream: TcpStream,
    peer: SocketAddr,
) {
    if stream.set_nonblocking(false).is_err()
        || stream.set_read_timeout(Some(READ_TIMEOUT)).is_err()
    {
        return;
    }

    let handshake_core = core.clone();
    let callback = move |_request: &Request, response: Response| {
        if !handshake_core.enabled.load(Ordering::SeqCst) {
            return Err(reject(
                StatusCode::FORBIDDEN,
                "Forbidden. This end-point is currently unavailable",
            ));
        }
        if let Some(cap) = handshake_core.max_connections {
            if handshake_core.connections.lock().unwrap().len() >= cap {
                return Err(reject(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Service Unavailable. Maximum connection limit reached",
                ));
            }
        }
        Ok(response)
    };

    let mut websocket = match tungstenite::accept_hdr(stream, callback) {
        Ok(websocket) => websocket,
        Err(e) => {
            debug!(%peer, error = %e, "handshake did not complete");
            return;
        }
    };

    let (sender, receiver) = mpsc::channel();
    let id = ConnectionId(core.next_connection.fetch_add(1, Ordering::SeqCst) + 1);
    let name: Arc<str> =
        format!("{}-{}", core.endpoint.connection_id_prefix(), id.0).into();
    let handle = ClientHandle {
        id,
        name: name.clone(),
        sender,
    };
    {
        let mut table = core.connections.lock().unwrap();
        table.map.insert(
            id,
            ConnectionEntry {
                handle,
                data: core.endpoint.initial_connection_data(),
            },
        );
        core.endpoint.on_client_connect(&mut table, id);
    }
    info!(connection = %name, %peer, "client connected");

    serve_connection(core, &mut websocket, id, &receiver, &name);

    let removed = core.connections.lock().unwrap().map.remove(&id);
    if let Some(entry) = removed {
        core.endpoint.on_client_disconnect(id, entry.data);
    }
    info!(connection = %name, "client disconnected");
}

fn serve_connection<E: WsEndpoint>(
    core: &Arc<ServerCore<E>>,
    websocket: &mut tungstenite::WebSocket<TcpStream>,
    id: ConnectionId,
    receiver: &Receiver<Outgoing>,
    name: &Arc<str>,
) {
    let mut closing = false;
    loop {
        // A connection that finished its handshake while the server was
        // stopping never got a close through its channel.
        if core.stopping.load(Ordering::SeqCst) && !closing {
            let _ = websocket.close(Some(CloseFrame {
                code: CloseCode::Away,
                reason: "".into(),
            }));
            closing = true;
        }

        // Flush queued pushes before blocking in the read.
        loop {
            match receiver.try_recv() {
                Ok(Outgoing::Text(text)) => {
                    if let Err(e) = websocket.send(Message::Text(text)) {
                        debug!(connection = %name, error = %e, "send failed");
                        return;
                    }
                }
                Ok(Outgoing::Close) => {
                    let _ = websocket.close(Some(CloseFrame {
                        code: CloseCode::Away,
                        reason: "".into(),
                    }));
                    closing = true;
                    break;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    closing = true;
                    break;
                }
            }
        }

        match websocket.read() {
            Ok(Message::Text(text)) => {
                let mut table = core.connections.lock().unwrap();
                if table.map.contains_key(&id) {
                    core.endpoint.on_client_message(&mut table, id, &text);
                }
            }
            Ok(Message::Binary(_)) => {
                core.endpoint
                    .on_protocol_violation(id, "binary frame received on a text endpoint");
            }
            Ok(_) => {} // ping/pong/close frames are handled by the library
            Err(tungstenite::Error::Io(e))
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                if closing {
                    return;
                }
            }
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                return;
            }
            Err(e) => {
                debug!(connection = %name, error = %e, "read failed");
                return;
            }
        }
    }
}
