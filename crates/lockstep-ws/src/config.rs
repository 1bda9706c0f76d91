//! Server configuration.

use std::net::SocketAddr;

use serde::Deserialize;

/// WebSocket server endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WsServerConfig {
    /// Address to listen on.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections; `None` means unlimited.
    pub max_connections: Option<usize>,
    /// Whether the endpoint starts enabled.
    pub enabled: bool,
}

impl Default for WsServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            max_connections: None,
            enabled: true,
        }
    }
}
