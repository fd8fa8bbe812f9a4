//! Connection-level models shared between the client and its peers.

use serde::{Deserialize, Serialize};

/// Why a live connection ended. Passed as the payload of `disconnect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// The client called `disconnect`.
    #[serde(rename = "io client disconnect")]
    ClientDisconnect,
    /// The link was closed (close frame or end of stream).
    #[serde(rename = "transport close")]
    TransportClose,
    /// The link failed with a read or write error.
    #[serde(rename = "transport error")]
    TransportError,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::ClientDisconnect => "io client disconnect",
            DisconnectReason::TransportClose => "transport close",
            DisconnectReason::TransportError => "transport error",
        }
    }

    /// Whether the driver should try to re-establish the link afterwards.
    pub fn allows_reconnect(&self) -> bool {
        !matches!(self, DisconnectReason::ClientDisconnect)
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
