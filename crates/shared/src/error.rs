//! Socket error type.

use thiserror::Error;

/// Errors produced while establishing or running a realtime connection.
///
/// These never escape the public socket surface as `Err` values; the
/// connection driver turns them into `connect_error` / `error` events.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SocketError {
    /// The endpoint URL could not be parsed or uses an unsupported scheme.
    #[error("invalid endpoint url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    /// The transport handshake failed.
    #[error("handshake failed: {0}")]
    Handshake(String),
    /// The handshake did not complete within the configured timeout.
    #[error("handshake timed out after {0}ms")]
    Timeout(u64),
    /// The link failed while reading or writing.
    #[error("transport error: {0}")]
    Transport(String),
    /// An outbound frame could not be serialized.
    #[error("failed to encode frame: {0}")]
    Encode(String),
    /// An inbound frame could not be parsed.
    #[error("failed to decode frame: {0}")]
    Decode(String),
    /// `connect` was called outside of a tokio runtime.
    #[error("no async runtime available to drive the connection")]
    NoRuntime,
}

impl SocketError {
    /// Whether a reconnection attempt could possibly succeed after this error.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SocketError::InvalidUrl { .. } | SocketError::NoRuntime)
    }
}
