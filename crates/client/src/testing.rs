//! In-memory transport for exercising sockets without a network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tether_shared::{SocketError, SocketFrame};
use tokio::sync::Notify;

use crate::socket::{Link, Transport};

/// What the next `open` call does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Accept,
    Refuse,
    Hang,
}

#[derive(Default)]
pub(crate) struct MockTransport {
    opens: AtomicUsize,
    refuse_all: AtomicBool,
    script: Mutex<VecDeque<Outcome>>,
    peers: Mutex<VecDeque<MockPeer>>,
    peer_ready: Notify,
}

impl MockTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of handshakes attempted so far.
    pub(crate) fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Queue outcomes for the next `open` calls; after the script runs out,
    /// opens are accepted unless `refuse_all` is set.
    pub(crate) fn script(&self, outcomes: impl IntoIterator<Item = Outcome>) {
        self.script.lock().unwrap().extend(outcomes);
    }

    pub(crate) fn refuse_all(&self, refuse: bool) {
        self.refuse_all.store(refuse, Ordering::SeqCst);
    }

    /// Wait for the server side of the next accepted link.
    pub(crate) async fn accept(&self) -> MockPeer {
        let wait = async {
            loop {
                if let Some(peer) = self.peers.lock().unwrap().pop_front() {
                    return peer;
                }
                self.peer_ready.notified().await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .expect("no link was opened")
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, _url: &str) -> Result<Link, SocketError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let scripted = self.script.lock().unwrap().pop_front();
        let outcome = scripted.unwrap_or(if self.refuse_all.load(Ordering::SeqCst) {
            Outcome::Refuse
        } else {
            Outcome::Accept
        });

        match outcome {
            Outcome::Refuse => Err(SocketError::Handshake("connection refused".to_string())),
            Outcome::Hang => std::future::pending().await,
            Outcome::Accept => {
                let (client_tx, from_client) = unbounded();
                let (to_client, client_rx) = unbounded();
                self.peers.lock().unwrap().push_back(MockPeer {
                    to_client: Some(to_client),
                    from_client,
                });
                self.peer_ready.notify_one();
                Ok(Link {
                    sink: Box::pin(
                        client_tx.sink_map_err(|e| SocketError::Transport(e.to_string())),
                    ),
                    stream: Box::pin(client_rx),
                })
            }
        }
    }
}

/// Server side of a mock link.
pub(crate) struct MockPeer {
    to_client: Option<UnboundedSender<Result<SocketFrame, SocketError>>>,
    from_client: UnboundedReceiver<SocketFrame>,
}

impl MockPeer {
    pub(crate) fn send(&self, event: &str, data: Value) {
        if let Some(tx) = &self.to_client {
            let _ = tx.unbounded_send(Ok(SocketFrame::new(event, data)));
        }
    }

    /// Fail the link with a transport error.
    pub(crate) fn fail(&self, message: &str) {
        if let Some(tx) = &self.to_client {
            let _ = tx.unbounded_send(Err(SocketError::Transport(message.to_string())));
        }
    }

    /// Close the link from the server side.
    pub(crate) fn close(&mut self) {
        self.to_client = None;
    }

    /// Next frame written by the client; `None` once the client closed the link.
    pub(crate) async fn recv(&mut self) -> Option<SocketFrame> {
        tokio::time::timeout(Duration::from_secs(5), self.from_client.next())
            .await
            .expect("client sent nothing")
    }
}

/// Poll `condition` until it holds, yielding to the runtime in between.
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}

/// Collects event payloads delivered to a handler.
#[derive(Clone, Default)]
pub(crate) struct Recorder(Arc<Mutex<Vec<Value>>>);

impl Recorder {
    pub(crate) fn handler(&self) -> impl Fn(&Value) + Send + Sync + 'static {
        let inner = self.0.clone();
        move |data: &Value| inner.lock().unwrap().push(data.clone())
    }

    pub(crate) fn values(&self) -> Vec<Value> {
        self.0.lock().unwrap().clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}
