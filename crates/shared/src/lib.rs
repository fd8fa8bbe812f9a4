//! Shared types for the tether realtime client: wire frames, reserved
//! event names, disconnect reasons and the socket error type.

pub mod error;
pub mod models;
pub mod protocol;

pub use error::*;
pub use models::*;
pub use protocol::*;
