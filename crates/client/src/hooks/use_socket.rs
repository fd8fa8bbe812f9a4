use dioxus::prelude::*;
use serde::Serialize;
use serde_json::Value;

use super::binding::SocketBinding;
use crate::config::ConnectionOverrides;
use crate::socket::{create_socket, HandlerId, Socket};

/// Options for [`use_socket`].
#[derive(Debug, Clone, PartialEq)]
pub struct UseSocketOptions {
    /// Endpoint of the realtime channel (`ws`, `wss`, `http` or `https`).
    pub url: String,
    /// Connect as soon as the component mounts.
    pub auto_connect: bool,
    /// Overrides merged over the default connection config.
    pub overrides: Option<ConnectionOverrides>,
}

impl UseSocketOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auto_connect: true,
            overrides: None,
        }
    }

    pub fn auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    pub fn overrides(mut self, overrides: ConnectionOverrides) -> Self {
        self.overrides = Some(overrides);
        self
    }
}

/// Value returned by [`use_socket`].
#[derive(Clone)]
pub struct UseSocket {
    is_connected: SyncSignal<bool>,
    binding: SocketBinding,
}

impl UseSocket {
    /// Whether the socket is currently connected.
    ///
    /// Reading this subscribes the calling component to connection changes.
    pub fn is_connected(&self) -> bool {
        self.is_connected.cloned()
    }

    /// Send `data` tagged with `event`. Buffered until connected.
    pub fn emit<T: Serialize>(&self, event: &str, data: T) {
        self.binding.emit(event, data);
    }

    /// Register `handler` for every future occurrence of `event`.
    pub fn on(&self, event: &str, handler: impl Fn(&Value) + Send + Sync + 'static) -> HandlerId {
        self.binding.on(event, handler)
    }

    /// Remove one handler, or all handlers for `event` when `id` is `None`.
    pub fn off(&self, event: &str, id: Option<HandlerId>) {
        self.binding.off(event, id);
    }

    pub fn socket(&self) -> &Socket {
        self.binding.socket()
    }
}

/// Hook owning one realtime connection for the lifetime of the component.
///
/// The socket is created on first render and kept across re-renders; it is
/// closed and stripped of all handlers when the component unmounts. A change
/// of `auto_connect` between renders tears the socket down and mounts it
/// again with the new setting, which also removes handlers registered with
/// [`UseSocket::on`].
///
/// ### Example
///
/// ```rust,ignore
/// fn Chat() -> Element {
///     let socket = use_socket(UseSocketOptions::new("wss://chat.example.com/socket"));
///
///     rsx! {
///         if socket.is_connected() { "online" } else { "offline" }
///         button { onclick: move |_| socket.emit("ping", ()), "Ping" }
///     }
/// }
/// ```
pub fn use_socket(options: UseSocketOptions) -> UseSocket {
    let UseSocketOptions {
        url,
        auto_connect,
        overrides,
    } = options;
    use_socket_with(auto_connect, move || create_socket(&url, overrides))
}

/// Like [`use_socket`], with the socket built by `init`.
///
/// `init` runs once per mount.
pub fn use_socket_with(auto_connect: bool, init: impl FnOnce() -> Socket) -> UseSocket {
    let is_connected = use_signal_sync(|| false);
    let binding = use_hook(|| SocketBinding::new(init(), auto_connect));

    use_effect(use_reactive(&auto_connect, {
        let binding = binding.clone();
        move |auto_connect| {
            if binding.is_mounted() && binding.auto_connect() != auto_connect {
                binding.teardown();
            }
            binding.set_auto_connect(auto_connect);
            binding.mount(connection_flag(is_connected));
        }
    }));

    use_drop({
        let binding = binding.clone();
        move || binding.teardown()
    });

    UseSocket {
        is_connected,
        binding,
    }
}

/// Setter for the connection flag, callable from the socket's driver thread.
fn connection_flag(is_connected: SyncSignal<bool>) -> impl Fn(bool) + Send + Sync + 'static {
    move |connected: bool| {
        let mut flag = is_connected;
        // The component may already be gone when the final disconnect lands.
        if let Ok(mut value) = flag.try_write() {
            *value = connected;
        };
    }
}
