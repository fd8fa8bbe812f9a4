//! Lifecycle of a socket owned by one mounted consumer.
//!
//! This is the part of `use_socket` that does not depend on the renderer:
//! mount wires the baseline observers and optionally connects, teardown
//! closes the connection and drops every handler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use serde_json::Value;
use tether_shared::events;

use crate::socket::{connect_socket, disconnect_socket, HandlerId, Socket};

#[derive(Clone)]
pub struct SocketBinding {
    socket: Socket,
    auto_connect: Arc<AtomicBool>,
    /// Ids of the connect/disconnect observers while mounted.
    baseline: Arc<Mutex<Option<[HandlerId; 2]>>>,
}

impl SocketBinding {
    pub fn new(socket: Socket, auto_connect: bool) -> Self {
        Self {
            socket,
            auto_connect: Arc::new(AtomicBool::new(auto_connect)),
            baseline: Arc::new(Mutex::new(None)),
        }
    }

    fn baseline(&self) -> MutexGuard<'_, Option<[HandlerId; 2]>> {
        self.baseline
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn socket(&self) -> &Socket {
        &self.socket
    }

    pub fn is_mounted(&self) -> bool {
        self.baseline().is_some()
    }

    pub fn auto_connect(&self) -> bool {
        self.auto_connect.load(Ordering::SeqCst)
    }

    /// Change whether the next [`mount`](Self::mount) connects.
    ///
    /// Has no effect on the current mount; callers tear down and mount again
    /// to apply it.
    pub fn set_auto_connect(&self, auto_connect: bool) {
        self.auto_connect.store(auto_connect, Ordering::SeqCst);
    }

    /// Register the baseline observers, then connect if `auto_connect` is set.
    ///
    /// `set_connected` receives `true` on every `connect` and `false` on every
    /// `disconnect`. Calling `mount` again while mounted does nothing.
    pub fn mount(&self, set_connected: impl Fn(bool) + Send + Sync + 'static) {
        let mut baseline = self.baseline();
        if baseline.is_some() {
            return;
        }

        let set_connected = Arc::new(set_connected);
        let on_connect = {
            let set_connected = set_connected.clone();
            self.socket
                .on(events::CONNECT, move |_: &Value| set_connected(true))
        };
        let on_disconnect = self
            .socket
            .on(events::DISCONNECT, move |_: &Value| set_connected(false));
        *baseline = Some([on_connect, on_disconnect]);
        drop(baseline);

        let auto_connect = self.auto_connect();
        crate::log_debug!(
            "Socket {} mounted (auto_connect: {})",
            self.socket.id(),
            auto_connect
        );
        if auto_connect {
            connect_socket(&self.socket);
        }
    }

    /// Close the connection, cancelling pending reconnects, drop buffered
    /// frames, then remove every handler. No handler fires afterwards.
    pub fn teardown(&self) {
        disconnect_socket(&self.socket);
        self.socket.discard_buffered();
        self.socket.remove_all_listeners();
        self.baseline().take();
        crate::log_debug!("Socket {} torn down", self.socket.id());
    }

    pub fn emit<T: Serialize>(&self, event: &str, data: T) {
        self.socket.emit(event, data);
    }

    pub fn on(&self, event: &str, handler: impl Fn(&Value) + Send + Sync + 'static) -> HandlerId {
        self.socket.on(event, handler)
    }

    pub fn off(&self, event: &str, id: Option<HandlerId>) {
        self.socket.off(event, id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionConfig, ConnectionOverrides};
    use crate::socket::ConnectionState;
    use crate::testing::{wait_until, MockTransport, Recorder};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn flag_log() -> (Arc<Mutex<Vec<bool>>>, impl Fn(bool) + Send + Sync + 'static) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        (log, move |connected: bool| sink.lock().unwrap().push(connected))
    }

    fn binding(transport: &Arc<MockTransport>, auto_connect: bool) -> SocketBinding {
        let overrides = ConnectionOverrides {
            randomization_factor: Some(0.0),
            reconnection_delay_ms: Some(100),
            ..Default::default()
        };
        let socket = Socket::new(
            "wss://example.test",
            ConnectionConfig::merged(Some(&overrides)),
            transport.clone(),
        );
        SocketBinding::new(socket, auto_connect)
    }

    #[tokio::test]
    async fn auto_connect_connects_on_mount() {
        let transport = MockTransport::new();
        let binding = binding(&transport, true);
        let (flags, set_connected) = flag_log();

        binding.mount(set_connected);
        let _peer = transport.accept().await;
        wait_until(|| flags.lock().unwrap().len() == 1).await;

        assert_eq!(transport.opens(), 1);
        assert_eq!(*flags.lock().unwrap(), vec![true]);
    }

    #[tokio::test]
    async fn without_auto_connect_nothing_happens() {
        let transport = MockTransport::new();
        let binding = binding(&transport, false);
        let (flags, set_connected) = flag_log();

        binding.mount(set_connected);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(transport.opens(), 0);
        assert!(flags.lock().unwrap().is_empty());
        assert_eq!(binding.socket().state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn flag_follows_transitions_in_order() {
        let transport = MockTransport::new();
        let binding = binding(&transport, true);
        let (flags, set_connected) = flag_log();
        binding.mount(set_connected);

        let mut peer = transport.accept().await;
        wait_until(|| flags.lock().unwrap().len() == 1).await;
        peer.close();
        wait_until(|| flags.lock().unwrap().len() == 2).await;
        let _peer = transport.accept().await;
        wait_until(|| flags.lock().unwrap().len() == 3).await;

        assert_eq!(*flags.lock().unwrap(), vec![true, false, true]);
    }

    #[tokio::test]
    async fn baseline_observers_run_before_consumer_handlers() {
        let transport = MockTransport::new();
        let binding = binding(&transport, false);
        let order = Arc::new(Mutex::new(Vec::new()));

        let baseline_order = order.clone();
        binding.mount(move |_| baseline_order.lock().unwrap().push("baseline"));
        let consumer_order = order.clone();
        binding.on(events::CONNECT, move |_| {
            consumer_order.lock().unwrap().push("consumer")
        });

        binding.socket().connect();
        let _peer = transport.accept().await;
        wait_until(|| order.lock().unwrap().len() == 2).await;
        assert_eq!(*order.lock().unwrap(), vec!["baseline", "consumer"]);
    }

    #[test]
    fn mount_twice_registers_baseline_once() {
        let transport = MockTransport::new();
        let binding = binding(&transport, false);
        binding.mount(|_| {});
        binding.mount(|_| {});

        assert!(binding.is_mounted());
        assert_eq!(binding.socket().listener_count(events::CONNECT), 1);
        assert_eq!(binding.socket().listener_count(events::DISCONNECT), 1);
    }

    #[tokio::test]
    async fn teardown_closes_then_silences_every_handler() {
        let transport = MockTransport::new();
        let binding = binding(&transport, true);
        let (flags, set_connected) = flag_log();
        let messages = Recorder::default();
        binding.mount(set_connected);
        binding.on("chat", messages.handler());

        let mut peer = transport.accept().await;
        wait_until(|| binding.socket().connected()).await;

        binding.teardown();

        // Closing happens before listeners are removed, so the flag saw the drop.
        assert_eq!(*flags.lock().unwrap(), vec![true, false]);
        assert!(peer.recv().await.is_none());
        assert!(!binding.is_mounted());
        assert_eq!(binding.socket().listener_count(events::CONNECT), 0);
        assert_eq!(binding.socket().listener_count("chat"), 0);

        // Late traffic on the detached link reaches nobody.
        peer.send("chat", json!("late"));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(messages.len(), 0);
        assert_eq!(flags.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_cancels_pending_reconnect() {
        let transport = MockTransport::new();
        transport.refuse_all(true);
        let binding = binding(&transport, true);
        binding.mount(|_| {});

        wait_until(|| binding.socket().state() == ConnectionState::Reconnecting { attempt: 1 })
            .await;
        binding.teardown();
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;

        assert_eq!(transport.opens(), 1);
        assert!(!binding.socket().active());
    }

    #[tokio::test]
    async fn remount_after_teardown_reconnects() {
        let transport = MockTransport::new();
        let binding = binding(&transport, true);
        let count = Arc::new(AtomicUsize::new(0));

        let first = count.clone();
        binding.mount(move |_| {
            first.fetch_add(1, Ordering::SeqCst);
        });
        let _peer = transport.accept().await;
        wait_until(|| binding.socket().connected()).await;
        binding.teardown();

        let (flags, set_connected) = flag_log();
        binding.mount(set_connected);
        let _peer = transport.accept().await;
        wait_until(|| flags.lock().unwrap().len() == 1).await;

        assert_eq!(transport.opens(), 2);
        assert_eq!(*flags.lock().unwrap(), vec![true]);
        // The first mount's observer was removed on teardown.
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn nothing_fires_after_teardown_while_connect_handlers_run() {
        let transport = MockTransport::new();
        let binding = binding(&transport, true);
        binding.on(events::CONNECT, |_: &Value| {
            std::thread::sleep(std::time::Duration::from_millis(300));
        });
        let (flags, set_connected) = flag_log();
        binding.mount(set_connected);

        let _peer = transport.accept().await;
        wait_until(|| binding.socket().connected()).await;
        binding.teardown();

        let at_teardown = flags.lock().unwrap().clone();
        assert_eq!(at_teardown.last(), Some(&false));
        assert_eq!(binding.socket().state(), ConnectionState::Disconnected);

        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        assert_eq!(*flags.lock().unwrap(), at_teardown);
    }

    #[tokio::test]
    async fn remount_does_not_send_frames_buffered_before_teardown() {
        let transport = MockTransport::new();
        transport.refuse_all(true);
        let binding = binding(&transport, true);
        binding.mount(|_| {});
        wait_until(|| binding.socket().state() == ConnectionState::Reconnecting { attempt: 1 })
            .await;
        binding.emit("stale", json!(1));
        binding.teardown();

        transport.refuse_all(false);
        binding.mount(|_| {});
        binding.emit("fresh", json!(2));
        let mut peer = transport.accept().await;

        assert_eq!(peer.recv().await.unwrap().event, "fresh");
    }

    #[tokio::test]
    async fn auto_connect_change_applies_on_next_mount() {
        let transport = MockTransport::new();
        let binding = binding(&transport, false);
        binding.mount(|_| {});
        assert_eq!(transport.opens(), 0);

        binding.set_auto_connect(true);
        binding.teardown();
        binding.mount(|_| {});
        let _peer = transport.accept().await;
        wait_until(|| binding.socket().connected()).await;
        assert!(binding.auto_connect());
    }

    #[tokio::test]
    async fn listener_multiplicity_survives_partial_removal() {
        let transport = MockTransport::new();
        let binding = binding(&transport, true);
        binding.mount(|_| {});
        let first = Recorder::default();
        let second = Recorder::default();
        let first_id = binding.on("chat", first.handler());
        binding.on("chat", second.handler());

        let peer = transport.accept().await;
        peer.send("chat", json!(1));
        wait_until(|| second.len() == 1).await;
        assert_eq!(first.values(), vec![json!(1)]);

        binding.off("chat", Some(first_id));
        peer.send("chat", json!(2));
        wait_until(|| second.len() == 2).await;
        assert_eq!(first.values(), vec![json!(1)]);
        assert_eq!(second.values(), vec![json!(1), json!(2)]);

        binding.off("chat", None);
        assert_eq!(binding.socket().listener_count("chat"), 0);
    }
}
