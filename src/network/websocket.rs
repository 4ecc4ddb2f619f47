//! WebSocket transport
//!
//! [`WsTransport`] is the synchronous handle the pipeline threads use;
//! [`WsDriver`] is the async task owning the socket. They talk through a
//! bounded outbound queue and a `watch` channel carrying the requested
//! link state.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::network::transport::{FrameHandler, Transport};

/// Link state requested by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkRequest {
    Down,
    /// Each `connect()` bumps the generation, forcing a fresh session
    Up(u64),
    Closed,
}

/// Why a session ended without a socket error
enum SessionEnd {
    Requested,
    Shutdown,
}

/// Pipeline-facing handle
pub struct WsTransport {
    requests: watch::Sender<LinkRequest>,
    outbound: mpsc::Sender<Bytes>,
    connected: Arc<AtomicBool>,
    generation: AtomicU64,
}

impl WsTransport {
    /// Build the handle and its driver. The driver does nothing until
    /// `connect()` is called and the driver is running.
    pub fn new(config: &TransportConfig) -> Result<(Arc<Self>, WsDriver), TransportError> {
        let url = Url::parse(&config.url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        let (requests_tx, requests_rx) = watch::channel(LinkRequest::Down);
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue.max(1));
        let connected = Arc::new(AtomicBool::new(false));

        let transport = Arc::new(Self {
            requests: requests_tx,
            outbound: outbound_tx,
            connected: connected.clone(),
            generation: AtomicU64::new(0),
        });
        let driver = WsDriver {
            url,
            requests: requests_rx,
            outbound: outbound_rx,
            connected,
            reconnect_delay: config.reconnect_delay(),
            max_backoff: config.max_backoff(),
        };
        Ok((transport, driver))
    }

    /// Stop the driver for good
    pub fn close(&self) {
        self.requests.send_replace(LinkRequest::Closed);
    }
}

impl Transport for WsTransport {
    fn connect(&self) -> Result<(), TransportError> {
        if *self.requests.borrow() == LinkRequest::Closed {
            return Err(TransportError::Closed);
        }
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.requests.send_replace(LinkRequest::Up(generation));
        Ok(())
    }

    fn disconnect(&self) {
        self.requests.send_if_modified(|request| {
            if matches!(request, LinkRequest::Up(_)) {
                *request = LinkRequest::Down;
                true
            } else {
                false
            }
        });
    }

    fn send_binary(&self, frame: Bytes) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

/// Async side owning the socket
pub struct WsDriver {
    url: Url,
    requests: watch::Receiver<LinkRequest>,
    outbound: mpsc::Receiver<Bytes>,
    connected: Arc<AtomicBool>,
    reconnect_delay: Duration,
    max_backoff: Duration,
}

impl WsDriver {
    /// Maintain the connection until the transport is closed.
    ///
    /// Failed sessions are retried with exponential backoff capped at
    /// `max_backoff`.
    pub async fn run(mut self, handler: Arc<dyn FrameHandler>) {
        let mut backoff = self.reconnect_delay;
        loop {
            let request = match self
                .requests
                .wait_for(|request| *request != LinkRequest::Down)
                .await
            {
                Ok(request) => *request,
                Err(_) => break,
            };
            let LinkRequest::Up(generation) = request else {
                break;
            };

            match self.session(generation, handler.as_ref()).await {
                Ok(SessionEnd::Requested) => {
                    backoff = self.reconnect_delay;
                }
                Ok(SessionEnd::Shutdown) => break,
                Err(e) => {
                    tracing::warn!("Connection error: {}. Retrying in {:?}", e, backoff);
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = self.requests.changed() => {}
                    }
                    backoff = (backoff * 2).min(self.max_backoff);
                }
            }
        }
        tracing::info!("WebSocket driver stopped");
    }

    async fn session(
        &mut self,
        generation: u64,
        handler: &dyn FrameHandler,
    ) -> Result<SessionEnd, TransportError> {
        tracing::info!("Connecting to {}", self.url);
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        // Frames queued for a previous session are stale
        while self.outbound.try_recv().is_ok() {}

        self.connected.store(true, Ordering::Release);
        tracing::info!("Connected to {}", self.url);
        handler.on_connected();

        let result = loop {
            tokio::select! {
                msg = read.next() => match msg {
                    Some(Ok(Message::Binary(data))) => handler.on_frame(&data),
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!("Ignoring text message ({} bytes)", text.len());
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!("Server closed connection: {:?}", frame);
                        break Err(TransportError::Closed);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Err(TransportError::ConnectionFailed(e.to_string())),
                    None => break Err(TransportError::Closed),
                },
                frame = self.outbound.recv() => match frame {
                    Some(frame) => {
                        if let Err(e) = write.send(Message::Binary(frame)).await {
                            break Err(TransportError::ConnectionFailed(e.to_string()));
                        }
                    }
                    None => break Ok(SessionEnd::Shutdown),
                },
                changed = self.requests.changed() => {
                    if changed.is_err() {
                        break Ok(SessionEnd::Shutdown);
                    }
                    let request = *self.requests.borrow_and_update();
                    match request {
                        LinkRequest::Up(current) if current == generation => {}
                        LinkRequest::Closed => break Ok(SessionEnd::Shutdown),
                        _ => break Ok(SessionEnd::Requested),
                    }
                }
            }
        };

        if result.is_ok() {
            let _ = write.send(Message::Close(None)).await;
        }
        self.connected.store(false, Ordering::Release);
        tracing::warn!("WebSocket disconnected");
        handler.on_disconnected();
        result
    }
}
