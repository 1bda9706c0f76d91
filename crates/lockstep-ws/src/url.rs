//! Endpoint URL helpers for values carried in CII messages.

use std::net::{SocketAddr, ToSocketAddrs};

use crate::error::{WsError, WsResult};

/// Validate a WebSocket endpoint URL (`ws://…`), as carried in the `tsUrl`
/// and `teUrl` CII fields.
pub fn parse_ws_url(url: &str) -> WsResult<&str> {
    if url.starts_with("ws://") && url.len() > "ws://".len() {
        Ok(url)
    } else {
        Err(WsError::BadWsUrl(url.to_string()))
    }
}

/// Parse a wall-clock endpoint URL (`udp://<host>:<port>`), as carried in
/// the `wcUrl` CII field, resolving the host if necessary.
pub fn parse_udp_url(url: &str) -> WsResult<SocketAddr> {
    let rest = url
        .strip_prefix("udp://")
        .ok_or_else(|| WsError::BadUdpUrl(url.to_string()))?;
    let (host, port) = rest
        .rsplit_once(':')
        .ok_or_else(|| WsError::BadUdpUrl(url.to_string()))?;
    if host.is_empty() || host.contains('/') || port.parse::<u16>().is_err() {
        return Err(WsError::BadUdpUrl(url.to_string()));
    }
    (host, port.parse::<u16>().unwrap_or(0))
        .to_socket_addrs()
        .map_err(|_| WsError::BadUdpUrl(url.to_string()))?
        .next()
        .ok_or_else(|| WsError::BadUdpUrl(url.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_urls_must_carry_the_scheme() {
        assert!(parse_ws_url("ws://192.168.1.1:7681/ts").is_ok());
        assert!(parse_ws_url("wss://192.168.1.1/ts").is_err());
        assert!(parse_ws_url("http://192.168.1.1/").is_err());
        assert!(parse_ws_url("ws://").is_err());
    }

    #[test]
    fn udp_urls_parse_to_socket_addresses() {
        assert_eq!(
            parse_udp_url("udp://127.0.0.1:6677").unwrap(),
            "127.0.0.1:6677".parse::<SocketAddr>().unwrap()
        );
        assert!(parse_udp_url("udp://127.0.0.1").is_err());
        assert!(parse_udp_url("udp://:6677").is_err());
        assert!(parse_udp_url("tcp://127.0.0.1:6677").is_err());
        assert!(parse_udp_url("udp://127.0.0.1:notaport").is_err());
    }
}
