use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

use super::state::SessionTarget;

/// Classified connection-establishment failures. Retried by the manager's
/// backoff policy, then surfaced as `ConnectionState::Error`.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("handshake failed: {0}")]
    Handshake(String),
}

/// Something the remote link reported after it was established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// One inbound text frame.
    Frame(String),
    /// The remote side closed the link with a close frame.
    Closed,
    /// The link died with a receive or send error.
    Failed(String),
}

/// One established link: frames pushed into `outbound` are written to the
/// wire; everything the wire produces arrives on `events`. Dropping the
/// outbound sender asks the transport to close the link gracefully.
pub struct SessionLink {
    pub outbound: mpsc::Sender<String>,
    pub events: mpsc::Receiver<LinkEvent>,
}

/// Transport seam for the session connection. The production implementation
/// speaks websockets; tests substitute channel-backed fakes.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    async fn open(&self, target: SessionTarget) -> Result<SessionLink, ConnectError>;
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const OUTBOUND_BUFFER: usize = 32;
const EVENT_BUFFER: usize = 64;

/// Websocket transport for the session endpoint.
pub struct WsTransport {
    endpoint_base: String,
}

impl WsTransport {
    /// `endpoint_base` is the ws(s) URL prefix; the target id is appended
    /// as the last path segment.
    pub fn new(endpoint_base: impl Into<String>) -> Self {
        Self {
            endpoint_base: endpoint_base.into(),
        }
    }

    fn url_for(&self, target: SessionTarget) -> String {
        format!("{}/{}", self.endpoint_base.trim_end_matches('/'), target.0)
    }
}

#[async_trait]
impl SessionTransport for WsTransport {
    async fn open(&self, target: SessionTarget) -> Result<SessionLink, ConnectError> {
        let url = self.url_for(target);
        let (stream, _response) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(&url))
            .await
            .map_err(|_| ConnectError::Timeout(CONNECT_TIMEOUT))?
            .map_err(classify_ws_error)?;

        debug!("websocket established to {url}");
        let (mut ws_sink, mut ws_stream) = stream.split();

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
        let (event_tx, event_rx) = mpsc::channel::<LinkEvent>(EVENT_BUFFER);

        let writer_events = event_tx.clone();
        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(err) = ws_sink.send(Message::Text(frame)).await {
                    let _ = writer_events.send(LinkEvent::Failed(err.to_string())).await;
                    return;
                }
            }
            // Outbound channel dropped: best-effort graceful close.
            if let Err(err) = ws_sink.send(Message::Close(None)).await {
                debug!("close frame not delivered: {err}");
            }
        });

        tokio::spawn(async move {
            while let Some(frame) = ws_stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if event_tx.send(LinkEvent::Frame(text)).await.is_err() {
                            return;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        let _ = event_tx.send(LinkEvent::Closed).await;
                        return;
                    }
                    Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                    Ok(Message::Binary(bytes)) => {
                        warn!("ignoring unexpected binary frame ({} bytes)", bytes.len());
                    }
                    Err(err) => {
                        let _ = event_tx.send(LinkEvent::Failed(err.to_string())).await;
                        return;
                    }
                }
            }
            // Stream ended without a close frame; treat as a remote close.
            let _ = event_tx.send(LinkEvent::Closed).await;
        });

        Ok(SessionLink {
            outbound: outbound_tx,
            events: event_rx,
        })
    }
}

fn classify_ws_error(err: tungstenite::Error) -> ConnectError {
    match err {
        tungstenite::Error::Io(io) => ConnectError::Unreachable(io.to_string()),
        tungstenite::Error::Url(url) => ConnectError::Unreachable(url.to_string()),
        other => ConnectError::Handshake(other.to_string()),
    }
}
