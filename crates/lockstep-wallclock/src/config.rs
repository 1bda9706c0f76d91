//! Engine configuration.

use std::net::SocketAddr;

use serde::Deserialize;

use crate::DEFAULT_WALL_CLOCK_PORT;

/// Wall-clock server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WallClockServerConfig {
    /// Address to bind the UDP socket to.
    pub bind_addr: SocketAddr,
    /// Report this precision (seconds) instead of the served clock's
    /// dispersion.
    pub precision_override: Option<f64>,
    /// Report this maximum frequency error (ppm) instead of the served
    /// clock's root value.
    pub max_freq_error_override: Option<f64>,
    /// Send a follow-up response after each response, carrying a fresh
    /// transmit time.
    pub follow_up: bool,
}

impl Default for WallClockServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_WALL_CLOCK_PORT)),
            precision_override: None,
            max_freq_error_override: None,
            follow_up: false,
        }
    }
}

/// Wall-clock client configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WallClockClientConfig {
    /// Local address to bind to; any port by default.
    pub bind_addr: SocketAddr,
    /// The wall-clock server to measure against.
    pub server_addr: SocketAddr,
}

impl Default for WallClockClientConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            server_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_WALL_CLOCK_PORT)),
        }
    }
}
