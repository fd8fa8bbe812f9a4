//! A realtime connection with state management and auto-reconnect.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use tether_shared::{events, DisconnectReason, SocketError, SocketFrame};
use tokio::sync::oneshot;

use super::registry::{EventRegistry, HandlerId};
use super::transport::{Link, Transport};
use crate::config::ConnectionConfig;

/// Connection state of a socket
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Failed { reason: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
        )
    }

    /// Whether a driver is running (handshaking, connected or waiting to retry).
    pub fn is_active(&self) -> bool {
        self.is_connected() || self.is_connecting()
    }
}

/// Handle to one logical realtime channel.
///
/// Clones share the same connection. Dropping the last clone stops any
/// running driver without dispatching further events.
///
/// Handlers are owned by the socket, so a handler that captures a clone of
/// its own socket keeps the connection alive after every other clone is
/// gone. Call [`remove_all_listeners`](Socket::remove_all_listeners) to
/// release such handlers.
#[derive(Clone)]
pub struct Socket {
    handle: Arc<SocketHandle>,
}

struct SocketHandle {
    shared: Arc<Shared>,
    outbound: UnboundedSender<Outgoing>,
}

impl Drop for SocketHandle {
    fn drop(&mut self) {
        self.shared.halt();
    }
}

/// State shared between socket handles and the driver task.
struct Shared {
    id: String,
    url: String,
    config: ConnectionConfig,
    transport: Arc<dyn Transport>,
    registry: EventRegistry,
    lifecycle: Mutex<Lifecycle>,
    /// Frames waiting to be written; drained only while a link is up.
    outbound: tokio::sync::Mutex<UnboundedReceiver<Outgoing>>,
    /// Sequence number of the last emitted frame.
    last_seq: AtomicU64,
    /// Frames numbered at or below this were discarded by a client disconnect.
    discard_through: AtomicU64,
}

/// A queued frame with its emit sequence number.
struct Outgoing {
    seq: u64,
    frame: SocketFrame,
}

struct Lifecycle {
    state: ConnectionState,
    /// Bumped on every connect/disconnect so stale drivers stop touching state.
    epoch: u64,
    /// Dropping this cancels the running driver.
    cancel: Option<oneshot::Sender<()>>,
}

impl Shared {
    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.lifecycle().epoch == epoch
    }

    /// Move to `state` if the driver for `epoch` still owns the socket.
    fn transition(&self, epoch: u64, state: ConnectionState) -> bool {
        let mut lifecycle = self.lifecycle();
        if lifecycle.epoch != epoch {
            return false;
        }
        lifecycle.state = state;
        true
    }

    fn dispatch(&self, event: &str, data: &Value) {
        let invoked = self.registry.dispatch(event, data);
        self.log_dispatch(event, invoked);
    }

    /// Dispatch on behalf of the driver for `epoch`; stops once it is stale.
    fn dispatch_current(&self, epoch: u64, event: &str, data: &Value) {
        let invoked = self
            .registry
            .dispatch_while(event, data, || self.is_current(epoch));
        self.log_dispatch(event, invoked);
    }

    fn log_dispatch(&self, event: &str, invoked: usize) {
        crate::log_debug!(
            "Socket {} dispatched '{}' to {} handler(s)",
            self.id,
            event,
            invoked
        );
    }

    /// Drop every frame emitted so far that has not been written yet.
    fn discard_buffered(&self) {
        let last = self.last_seq.load(Ordering::SeqCst);
        self.discard_through.fetch_max(last, Ordering::SeqCst);
    }

    fn is_discarded(&self, outgoing: &Outgoing) -> bool {
        outgoing.seq <= self.discard_through.load(Ordering::SeqCst)
    }

    /// Stop any driver and forget the connection without notifying handlers.
    fn halt(&self) {
        let mut lifecycle = self.lifecycle();
        lifecycle.epoch += 1;
        lifecycle.state = ConnectionState::Disconnected;
        lifecycle.cancel.take();
    }
}

impl Socket {
    /// Create a disconnected socket for `url`. Never connects by itself.
    pub fn new(
        url: impl Into<String>,
        config: ConnectionConfig,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let (outbound, receiver) = unbounded();
        let shared = Arc::new(Shared {
            id: uuid::Uuid::new_v4().to_string(),
            url: url.into(),
            config,
            transport,
            registry: EventRegistry::new(),
            lifecycle: Mutex::new(Lifecycle {
                state: ConnectionState::Disconnected,
                epoch: 0,
                cancel: None,
            }),
            outbound: tokio::sync::Mutex::new(receiver),
            last_seq: AtomicU64::new(0),
            discard_through: AtomicU64::new(0),
        });
        crate::log_debug!("Socket {} created for {}", shared.id, shared.url);

        Self {
            handle: Arc::new(SocketHandle { shared, outbound }),
        }
    }

    fn shared(&self) -> &Arc<Shared> {
        &self.handle.shared
    }

    /// Locally unique id, used in logs.
    pub fn id(&self) -> &str {
        &self.shared().id
    }

    pub fn url(&self) -> &str {
        &self.shared().url
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared().config
    }

    pub fn state(&self) -> ConnectionState {
        self.shared().lifecycle().state.clone()
    }

    pub fn connected(&self) -> bool {
        self.shared().lifecycle().state.is_connected()
    }

    /// Whether the socket is connected or working towards a connection.
    pub fn active(&self) -> bool {
        self.shared().lifecycle().state.is_active()
    }

    /// Start connecting. No-op while the socket is already active.
    ///
    /// Returns immediately; the outcome is reported through `connect`,
    /// `connect_error` and the reconnection events.
    pub fn connect(&self) {
        let shared = self.shared();
        let mut lifecycle = shared.lifecycle();
        if lifecycle.state.is_active() {
            crate::log_debug!("Socket {} already active, ignoring connect", shared.id);
            return;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                drop(lifecycle);
                let err = SocketError::NoRuntime;
                crate::log_error!("Socket {} cannot connect: {}", shared.id, err);
                shared.dispatch(events::CONNECT_ERROR, &json!(err.to_string()));
                return;
            }
        };

        let (cancel_tx, cancel_rx) = oneshot::channel();
        lifecycle.epoch += 1;
        lifecycle.state = ConnectionState::Connecting;
        lifecycle.cancel = Some(cancel_tx);
        let epoch = lifecycle.epoch;
        drop(lifecycle);

        crate::log_info!("Socket {} connecting to {}", shared.id, shared.url);
        runtime.spawn(drive(shared.clone(), epoch, cancel_rx));
    }

    /// Close the connection and cancel pending reconnects. No-op when not active.
    ///
    /// Frames still buffered are discarded. Waits for handlers the driver is
    /// running on other threads, then dispatches `disconnect` with
    /// `io client disconnect` if the socket was connected.
    pub fn disconnect(&self) {
        let shared = self.shared();
        let was_connected = {
            let mut lifecycle = shared.lifecycle();
            if !lifecycle.state.is_active() {
                crate::log_debug!("Socket {} not active, ignoring disconnect", shared.id);
                return;
            }
            let was_connected = lifecycle.state.is_connected();
            lifecycle.epoch += 1;
            lifecycle.state = ConnectionState::Disconnected;
            lifecycle.cancel.take();
            was_connected
        };
        shared.discard_buffered();
        shared.registry.wait_idle();

        crate::log_info!("Socket {} disconnected from {}", shared.id, shared.url);
        if was_connected {
            shared.dispatch(
                events::DISCONNECT,
                &json!(DisconnectReason::ClientDisconnect.as_str()),
            );
        }
    }

    /// Send `data` tagged with `event`.
    ///
    /// Frames emitted while not connected are buffered and flushed once a
    /// link is up, unless [`disconnect`](Self::disconnect) or
    /// [`discard_buffered`](Self::discard_buffered) runs first. Reserved
    /// lifecycle event names are refused.
    pub fn emit<T: Serialize>(&self, event: &str, data: T) {
        let shared = self.shared();
        if events::is_reserved(event) {
            crate::log_warn!(
                "Socket {}: '{}' is a reserved event name and cannot be emitted",
                shared.id,
                event
            );
            return;
        }

        let data = match serde_json::to_value(data) {
            Ok(data) => data,
            Err(e) => {
                crate::log_error!("Socket {}: failed to serialize '{}': {}", shared.id, event, e);
                return;
            }
        };

        if !self.connected() {
            crate::log_debug!("Socket {} buffering '{}' until connected", shared.id, event);
        }
        let seq = shared.last_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let outgoing = Outgoing {
            seq,
            frame: SocketFrame::new(event, data),
        };
        if let Err(e) = self.handle.outbound.unbounded_send(outgoing) {
            crate::log_error!("Socket {}: failed to queue '{}': {}", shared.id, event, e);
        }
    }

    /// Register `handler` for every future occurrence of `event`.
    pub fn on(
        &self,
        event: &str,
        handler: impl Fn(&Value) + Send + Sync + 'static,
    ) -> HandlerId {
        self.shared().registry.on(event, Arc::new(handler))
    }

    /// Remove the handler registered as `id`, or every handler for `event` when `None`.
    pub fn off(&self, event: &str, id: Option<HandlerId>) {
        let removed = self.shared().registry.off(event, id);
        crate::log_debug!(
            "Socket {} removed {} handler(s) for '{}'",
            self.id(),
            removed,
            event
        );
    }

    /// Remove every handler. Returns once handlers running on other threads finish.
    pub fn remove_all_listeners(&self) {
        self.shared().registry.clear();
    }

    /// Drop frames emitted so far that are still waiting for a link.
    pub fn discard_buffered(&self) {
        self.shared().discard_buffered();
        crate::log_debug!("Socket {} discarded buffered frames", self.id());
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.shared().registry.listener_count(event)
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("id", &self.id())
            .field("url", &self.url())
            .field("state", &self.state())
            .finish()
    }
}

/// How a link ended.
enum LinkEnd {
    Cancelled,
    Lost(DisconnectReason),
}

enum Failure {
    Handshake(SocketError),
    Lost(DisconnectReason),
}

/// State to enter after a failure, given how many reconnects were already made.
fn state_after_failure(config: &ConnectionConfig, attempts_made: u32) -> ConnectionState {
    if !config.reconnection {
        ConnectionState::Disconnected
    } else if config.may_retry(attempts_made) {
        ConnectionState::Reconnecting {
            attempt: attempts_made + 1,
        }
    } else {
        ConnectionState::Failed {
            reason: format!(
                "Max reconnect attempts ({}) exceeded",
                config.reconnection_attempts
            ),
        }
    }
}

/// Connection loop for one `connect` call: handshake, pump, retry with backoff.
async fn drive(shared: Arc<Shared>, epoch: u64, mut cancel: oneshot::Receiver<()>) {
    let config = &shared.config;
    let mut attempt = 0u32;

    loop {
        let opened = tokio::select! {
            biased;
            _ = &mut cancel => return,
            result = tokio::time::timeout(config.timeout, shared.transport.open(&shared.url)) => {
                result.unwrap_or_else(|_| Err(SocketError::Timeout(config.timeout.as_millis() as u64)))
            }
        };

        let failure = match opened {
            Ok(link) => {
                if !shared.transition(epoch, ConnectionState::Connected) {
                    return;
                }
                crate::log_info!("Socket {} connected to {}", shared.id, shared.url);
                shared.dispatch_current(epoch, events::CONNECT, &Value::Null);
                if attempt > 0 {
                    shared.dispatch_current(epoch, events::RECONNECT, &json!(attempt));
                }
                attempt = 0;

                match pump(&shared, epoch, link, &mut cancel).await {
                    LinkEnd::Cancelled => return,
                    LinkEnd::Lost(reason) => Failure::Lost(reason),
                }
            }
            Err(e) => Failure::Handshake(e),
        };

        let next = match &failure {
            Failure::Handshake(e) if !e.is_retryable() => ConnectionState::Failed {
                reason: e.to_string(),
            },
            _ => state_after_failure(config, attempt),
        };
        if !shared.transition(epoch, next.clone()) {
            return;
        }

        match failure {
            Failure::Lost(reason) => {
                crate::log_info!("Socket {} to {} closed: {}", shared.id, shared.url, reason);
                shared.dispatch_current(epoch, events::DISCONNECT, &json!(reason.as_str()));
            }
            Failure::Handshake(e) => {
                crate::log_error!("Socket {} failed to connect to {}: {}", shared.id, shared.url, e);
                shared.dispatch_current(epoch, events::CONNECT_ERROR, &json!(e.to_string()));
            }
        }

        let next_attempt = match next {
            ConnectionState::Reconnecting { attempt } => attempt,
            ConnectionState::Failed { reason } => {
                crate::log_error!("Socket {} giving up on {}: {}", shared.id, shared.url, reason);
                if config.reconnection && !config.may_retry(attempt) {
                    shared.dispatch_current(epoch, events::RECONNECT_FAILED, &Value::Null);
                }
                return;
            }
            _ => return,
        };

        let delay = config.delay_for_attempt(next_attempt);
        crate::log_info!(
            "Reconnecting to {} in {}ms (attempt {})",
            shared.url,
            delay.as_millis(),
            next_attempt
        );
        tokio::select! {
            biased;
            _ = &mut cancel => return,
            _ = tokio::time::sleep(delay) => {}
        }
        if !shared.is_current(epoch) {
            return;
        }
        attempt = next_attempt;
        shared.dispatch_current(epoch, events::RECONNECT_ATTEMPT, &json!(attempt));
    }
}

/// Move frames both ways until the link ends or the driver is cancelled.
async fn pump(
    shared: &Shared,
    epoch: u64,
    link: Link,
    cancel: &mut oneshot::Receiver<()>,
) -> LinkEnd {
    let Link {
        mut sink,
        mut stream,
    } = link;

    let mut outbound = tokio::select! {
        biased;
        _ = &mut *cancel => {
            let _ = sink.close().await;
            return LinkEnd::Cancelled;
        }
        guard = shared.outbound.lock() => guard,
    };

    loop {
        tokio::select! {
            biased;
            _ = &mut *cancel => {
                let _ = sink.close().await;
                return LinkEnd::Cancelled;
            }
            inbound = stream.next() => match inbound {
                Some(Ok(frame)) => {
                    if !shared.is_current(epoch) {
                        return LinkEnd::Cancelled;
                    }
                    if events::is_reserved(&frame.event) {
                        crate::log_warn!(
                            "Socket {} ignoring inbound frame with reserved event '{}'",
                            shared.id,
                            frame.event
                        );
                    } else {
                        crate::log_debug!("Socket {} received '{}'", shared.id, frame.event);
                        shared.dispatch_current(epoch, &frame.event, &frame.data);
                    }
                }
                Some(Err(e)) => {
                    crate::log_error!("Socket {} read error: {}", shared.id, e);
                    shared.dispatch_current(epoch, events::ERROR, &json!(e.to_string()));
                    return LinkEnd::Lost(DisconnectReason::TransportError);
                }
                None => return LinkEnd::Lost(DisconnectReason::TransportClose),
            },
            outgoing = outbound.next() => match outgoing {
                Some(outgoing) => {
                    if shared.is_discarded(&outgoing) {
                        crate::log_debug!(
                            "Socket {} dropping discarded '{}'",
                            shared.id,
                            outgoing.frame.event
                        );
                        continue;
                    }
                    let frame = outgoing.frame;
                    crate::log_debug!("Socket {} sending '{}'", shared.id, frame.event);
                    if let Err(e) = sink.send(frame).await {
                        crate::log_error!("Send failed: {}", e);
                        shared.dispatch_current(epoch, events::ERROR, &json!(e.to_string()));
                        return LinkEnd::Lost(DisconnectReason::TransportError);
                    }
                }
                None => {
                    // Every socket handle is gone
                    let _ = sink.close().await;
                    return LinkEnd::Cancelled;
                }
            },
        }
    }
}
