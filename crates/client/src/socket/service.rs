//! Connection factory and idempotent connect/disconnect controls.

use std::sync::Arc;

use super::connection::Socket;
use super::transport::{Transport, TungsteniteTransport};
use crate::config::{ConnectionConfig, ConnectionOverrides};

/// Create a WebSocket-backed socket for `url`, with `overrides` merged over
/// the defaults. The socket is returned disconnected, whatever
/// `auto_connect` says; callers decide when to connect.
pub fn create_socket(url: &str, overrides: Option<ConnectionOverrides>) -> Socket {
    create_socket_with(url, overrides, Arc::new(TungsteniteTransport))
}

/// Same as [`create_socket`] over an explicit transport.
pub fn create_socket_with(
    url: &str,
    overrides: Option<ConnectionOverrides>,
    transport: Arc<dyn Transport>,
) -> Socket {
    let config = ConnectionConfig::merged(overrides.as_ref());
    Socket::new(url, config, transport)
}

/// Connect unless the socket is already connected or connecting.
pub fn connect_socket(socket: &Socket) {
    if !socket.active() {
        socket.connect();
    }
}

/// Disconnect unless the socket is already disconnected.
///
/// Also cancels a pending reconnect when the socket is between attempts.
pub fn disconnect_socket(socket: &Socket) {
    if socket.active() {
        socket.disconnect();
    }
}
