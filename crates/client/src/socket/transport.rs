//! Transport seam and the tokio-tungstenite implementation.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use tether_shared::{SocketError, SocketFrame};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

pub type FrameSink = Pin<Box<dyn Sink<SocketFrame, Error = SocketError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<SocketFrame, SocketError>> + Send>>;

/// An established bidirectional link.
///
/// The stream ending means the remote side closed the link; an `Err` item
/// means the link failed.
pub struct Link {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens links to a realtime endpoint. One call per handshake attempt.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, url: &str) -> Result<Link, SocketError>;
}

/// Map an endpoint URL onto a WebSocket URL.
///
/// `http`/`https` become `ws`/`wss`; `ws`/`wss` are kept as-is.
pub fn resolve_ws_url(raw: &str) -> Result<Url, SocketError> {
    let invalid = |reason: String| SocketError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };

    let mut url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => return Err(invalid(format!("unsupported scheme '{}'", other))),
    };
    if url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    if url.scheme() != scheme {
        url.set_scheme(scheme)
            .map_err(|_| invalid(format!("cannot switch scheme to '{}'", scheme)))?;
    }
    Ok(url)
}

/// WebSocket transport using tokio-tungstenite. Frames travel as JSON text messages.
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteTransport;

#[async_trait]
impl Transport for TungsteniteTransport {
    async fn open(&self, url: &str) -> Result<Link, SocketError> {
        let url = resolve_ws_url(url)?;
        let (ws_stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| SocketError::Handshake(e.to_string()))?;

        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(|e| SocketError::Transport(e.to_string()))
            .with(|frame: SocketFrame| future::ready(frame.encode().map(Message::text)));

        let stream = read
            .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
            .filter_map(|msg| {
                future::ready(match msg {
                    Ok(Message::Text(text)) => match SocketFrame::decode(text.as_str()) {
                        Ok(frame) => Some(Ok(frame)),
                        Err(e) => {
                            crate::log_warn!("Dropping undecodable frame: {}", e);
                            None
                        }
                    },
                    Ok(Message::Ping(data)) => {
                        // Pong is handled automatically by tungstenite
                        crate::log_debug!("Received ping: {:?}", data);
                        None
                    }
                    Ok(_) => None,
                    Err(e) => Some(Err(SocketError::Transport(e.to_string()))),
                })
            });

        Ok(Link {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}
