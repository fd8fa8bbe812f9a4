//! Hooks binding realtime sockets to component lifetimes.

mod binding;
mod use_socket;

pub use binding::SocketBinding;
pub use use_socket::{use_socket, use_socket_with, UseSocket, UseSocketOptions};
