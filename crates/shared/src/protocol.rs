//! Wire frame format and reserved event names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::SocketError;

/// Event names dispatched locally by the connection itself.
///
/// These can be subscribed to with `on`, but never emitted by the
/// application.
pub mod events {
    pub const CONNECT: &str = "connect";
    pub const DISCONNECT: &str = "disconnect";
    pub const CONNECT_ERROR: &str = "connect_error";
    pub const ERROR: &str = "error";
    pub const RECONNECT_ATTEMPT: &str = "reconnect_attempt";
    pub const RECONNECT: &str = "reconnect";
    pub const RECONNECT_FAILED: &str = "reconnect_failed";

    pub const RESERVED: &[&str] = &[
        CONNECT,
        DISCONNECT,
        CONNECT_ERROR,
        ERROR,
        RECONNECT_ATTEMPT,
        RECONNECT,
        RECONNECT_FAILED,
    ];

    /// Whether `event` is one of the lifecycle events above.
    pub fn is_reserved(event: &str) -> bool {
        RESERVED.contains(&event)
    }
}

/// A single event carried over the realtime channel as a JSON text frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocketFrame {
    /// Unique frame id (uuid v4).
    pub id: String,
    /// Event name the frame is tagged with.
    pub event: String,
    /// Event payload; `null` when the sender attached none.
    #[serde(default)]
    pub data: Value,
    /// When the frame was created.
    pub ts: DateTime<Utc>,
}

impl SocketFrame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event: event.into(),
            data,
            ts: Utc::now(),
        }
    }

    /// Serialize into the JSON text sent on the wire.
    pub fn encode(&self) -> Result<String, SocketError> {
        serde_json::to_string(self).map_err(|e| SocketError::Encode(e.to_string()))
    }

    /// Parse a JSON text frame received from the wire.
    pub fn decode(text: &str) -> Result<Self, SocketError> {
        serde_json::from_str(text).map_err(|e| SocketError::Decode(e.to_string()))
    }
}
