//! Tether Client - realtime socket connections for Dioxus applications
//!
//! This crate manages one persistent WebSocket channel per mounted
//! component: creation, connect/disconnect, event subscription,
//! reconnection with backoff and teardown on unmount.

#[cfg(target_arch = "wasm32")]
compile_error!("tether-client needs a native tokio runtime; wasm32 targets are not supported");

pub mod config;
pub mod hooks;
pub mod logging;
pub mod socket;

#[cfg(test)]
mod testing;

pub use config::{ConnectionConfig, ConnectionOverrides};
pub use hooks::{use_socket, use_socket_with, SocketBinding, UseSocket, UseSocketOptions};
pub use socket::{
    connect_socket, create_socket, create_socket_with, disconnect_socket, ConnectionState,
    HandlerId, Socket, Transport,
};
pub use tether_shared::{events, DisconnectReason, SocketError, SocketFrame};
