//! The blocking WebSocket client connection.

use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, warn};
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::protocol::CloseFrame;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::Message;

use crate::error::{WsError, WsResult};
use crate::url::parse_ws_url;

const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Callbacks for a [`WsClientConnection`].
///
/// All callbacks run on the connection's reader thread, in arrival order.
pub trait WsClientHandler: Send + 'static {
    /// The connection is open; messages can now be sent.
    fn on_open(&mut self);

    /// A text frame arrived.
    fn on_text(&mut self, message: &str);

    /// The connection closed, with the peer's close code if one was given.
    fn on_close(&mut self, code: Option<u16>);

    /// The peer broke the protocol (e.g. sent a binary frame). The
    /// connection stays open.
    fn on_protocol_error(&mut self, description: &str) {
        warn!(description, "protocol error");
    }
}

enum Outgoing {
    Text(String),
    Close(u16),
}

/// A WebSocket client connection to a `ws://` endpoint.
///
/// The connection runs a reader thread that dispatches into a
/// [`WsClientHandler`]; sends from any thread are queued and written by
/// that thread.
pub struct WsClientConnection {
    sender: Sender<Outgoing>,
    connected: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for WsClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsClientConnection")
            .field("connected", &self.connected.load(std::sync::atomic::Ordering::SeqCst))
            .finish()
    }
}

impl WsClientConnection {
    /// Connect and start dispatching messages to `handler`.
    ///
    /// Fails with [`WsError::Rejected`] when the server refuses the upgrade
    /// (403 disabled / 503 full), or [`WsError::Connection`] when the
    /// endpoint cannot be reached.
    pub fn connect(url: &str, mut handler: Box<dyn WsClientHandler>) -> WsResult<Self> {
        parse_ws_url(url)?;
        let (mut websocket, _response) = tungstenite::connect(url)?;
        if let MaybeTlsStream::Plain(stream) = websocket.get_ref() {
            stream.set_read_timeout(Some(READ_TIMEOUT))?;
        }

        let (sender, receiver) = mpsc::channel();
        let connected = Arc::new(AtomicBool::new(true));
        let thread_connected = connected.clone();
        let thread = std::thread::Builder::new()
            .name("lockstep-ws-client".into())
            .spawn(move || {
                handler.on_open();
                let code = run_reader(&mut websocket, &receiver, handler.as_mut());
                thread_connected.store(false, Ordering::SeqCst);
                handler.on_close(code);
            })?;

        Ok(Self {
            sender,
            connected,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Whether the connection is still open.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Queue a text frame.
    pub fn send_text(&self, text: String) -> WsResult<()> {
        self.sender
            .send(Outgoing::Text(text))
            .map_err(|_| WsError::Closed)
    }

    /// Close the connection and wait for the reader thread to finish.
    pub fn disconnect(&self, code: u16) {
        let _ = self.sender.send(Outgoing::Close(code));
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WsClientConnection {
    fn drop(&mut self) {
        self.disconnect(crate::CLOSE_GOING_AWAY);
    }
}

fn run_reader(
    websocket: &mut tungstenite::WebSocket<MaybeTlsStream<TcpStream>>,
    receiver: &Receiver<Outgoing>,
    handler: &mut dyn WsClientHandler,
) -> Option<u16> {
    let mut closing = false;
    loop {
        loop {
            match receiver.try_recv() {
                Ok(Outgoing::Text(text)) => {
                    if let Err(e) = websocket.send(Message::Text(text)) {
                        debug!(error = %e, "send failed");
                        return None;
                    }
                }
                Ok(Outgoing::Close(code)) => {
                    let _ = websocket.close(Some(CloseFrame {
                        code: CloseCode::from(code),
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
            Ok(Message::Text(text)) => handler.on_text(&text),
            Ok(Message::Binary(_)) => {
                handler.on_protocol_error("binary frame received on a text endpoint");
            }
            Ok(Message::Close(frame)) => {
                return frame.map(|f| f.code.into());
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(e))
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                if closing {
                    return None;
                }
            }
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                return None;
            }
            Err(e) => {
                debug!(error = %e, "read failed");
                return None;
            }
        }
    }
}
