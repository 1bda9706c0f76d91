//! # lockstep-ws: WebSocket endpoint glue
//!
//! The transport layer shared by the CII and TS protocols: a blocking
//! WebSocket server base with a connection cap and an enable/disable
//! switch, and a blocking client connection with a callback handler.
//!
//! The server follows the protocol endpoints' rejection rules: a disabled
//! endpoint refuses upgrades with HTTP 403, a full endpoint with HTTP 503,
//! and disabling an endpoint closes every open connection with WebSocket
//! close code 1001 ("going away").
//!
//! Protocol servers implement [`WsEndpoint`]; per-connection protocol state
//! lives in the server's [`ConnectionTable`], and endpoint callbacks run
//! with that table locked, so a callback can push messages to any
//! connection without further locking.

mod client;
mod config;
mod error;
mod server;
mod url;

pub use client::{WsClientConnection, WsClientHandler};
pub use config::WsServerConfig;
pub use error::{WsError, WsResult};
pub use server::{
    ClientHandle, ConnectionEntry, ConnectionId, ConnectionTable, WsEndpoint, WsServer,
};
pub use url::{parse_udp_url, parse_ws_url};

/// WebSocket close code sent when a server endpoint goes away.
pub const CLOSE_GOING_AWAY: u16 = 1001;
