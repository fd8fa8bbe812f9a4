//! Realtime socket connections.
//!
//! This module provides:
//! - [`Socket`], one logical bidirectional channel with auto-reconnect
//! - the connection factory ([`create_socket`], [`connect_socket`], [`disconnect_socket`])
//! - the [`Transport`] seam, with a tokio-tungstenite implementation
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 Socket                       │
//! │  (handle: emit / on / off / connect / ...)   │
//! └──────────────────────────────────────────────┘
//!          │ outbound frames          ▲ dispatch
//!          ▼                          │
//! ┌──────────────────────────────────────────────┐
//! │            driver task (tokio)               │
//! │  handshake → pump → backoff → handshake ...  │
//! └──────────────────────────────────────────────┘
//!                      │
//!                      ▼
//!              ┌───────────────┐
//!              │   Transport   │
//!              │ (WebSocket)   │
//!              └───────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let socket = create_socket("wss://chat.example.com/socket", None);
//! socket.on("message", |data| println!("got {}", data));
//! connect_socket(&socket);
//! socket.emit("join", serde_json::json!({ "room": "general" }));
//! ```

mod connection;
mod registry;
mod service;
mod transport;

pub use connection::{ConnectionState, Socket};
pub use registry::{EventHandler, EventRegistry, HandlerId};
pub use service::{connect_socket, create_socket, create_socket_with, disconnect_socket};
pub use transport::{resolve_ws_url, FrameSink, FrameStream, Link, Transport, TungsteniteTransport};
