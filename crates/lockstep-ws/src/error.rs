//! WebSocket transport error types.

use thiserror::Error;

pub type WsResult<T> = Result<T, WsError>;

/// Errors from the WebSocket server and client glue.
#[derive(Debug, Error)]
pub enum WsError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The WebSocket handshake or transport failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// The server refused the upgrade, e.g. 403 when the endpoint is
    /// disabled or 503 when its connection limit is reached.
    #[error("endpoint rejected the connection with HTTP status {0}")]
    Rejected(u16),

    /// The connection is no longer open.
    #[error("connection is closed")]
    Closed,

    #[error("not a ws:// URL: {0}")]
    BadWsUrl(String),

    #[error("not a udp://<host>:<port> URL: {0}")]
    BadUdpUrl(String),
}

impl From<tungstenite::Error> for WsError {
    fn from(error: tungstenite::Error) -> Self {
        match error {
            tungstenite::Error::Http(response) => Self::Rejected(response.status().as_u16()),
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                Self::Closed
            }
            tungstenite::Error::Io(e) => Self::Io(e),
            other => Self::Connection(other.to_string()),
        }
    }
}
