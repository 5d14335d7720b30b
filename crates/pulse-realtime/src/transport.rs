//! Socket transport abstraction.
//!
//! The supervisor never touches tungstenite directly: it dials through the
//! [`Transport`] trait and consumes a [`SocketHandle`], a pair of channels
//! fed by a pump task. Tests drive fake sockets by building handles from
//! the test side; production uses [`WsTransport`].

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tracing::{debug, trace};

use pulse_core::CloseCode;

use crate::errors::{RealtimeError, Result};

/// Something the socket pump reports upward.
#[derive(Debug)]
pub enum SocketEvent {
    /// One inbound text frame.
    Frame(String),
    /// The socket closed.
    Closed {
        /// Close code (1006 when no close frame arrived).
        code: CloseCode,
        /// Whether the close handshake completed.
        was_clean: bool,
    },
}

/// Command sent down to the socket pump.
#[derive(Debug)]
pub enum SocketCommand {
    /// Close the socket with a code and reason.
    Close {
        /// Close code to send.
        code: u16,
        /// Close reason (e.g. "superseded", "shutting down").
        reason: String,
    },
}

/// Handle to one live socket: an event stream plus a command channel.
pub struct SocketHandle {
    events: mpsc::Receiver<SocketEvent>,
    commands: mpsc::Sender<SocketCommand>,
}

impl SocketHandle {
    /// Build a handle from its two channel halves.
    #[must_use]
    pub fn new(events: mpsc::Receiver<SocketEvent>, commands: mpsc::Sender<SocketCommand>) -> Self {
        Self { events, commands }
    }

    /// Receive the next socket event. `None` means the pump is gone.
    pub async fn recv(&mut self) -> Option<SocketEvent> {
        self.events.recv().await
    }

    /// A detachable closer for this socket.
    #[must_use]
    pub fn closer(&self) -> SocketCloser {
        SocketCloser(self.commands.clone())
    }
}

/// Fire-and-forget close handle, detached from the event stream.
#[derive(Clone)]
pub struct SocketCloser(mpsc::Sender<SocketCommand>);

impl SocketCloser {
    /// Ask the pump to close the socket. Best effort.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.0.try_send(SocketCommand::Close {
            code,
            reason: reason.to_string(),
        });
    }
}

/// Dials a realtime endpoint and returns a live socket.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Establish a connection. Resolving `Ok` means the socket is open.
    async fn connect(&self, url: &str) -> Result<SocketHandle>;
}

/// Production transport over `tokio-tungstenite`.
#[derive(Debug, Default)]
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, url: &str) -> Result<SocketHandle> {
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| RealtimeError::Connect(e.to_string()))?;

        let (events_tx, events_rx) = mpsc::channel(64);
        let (commands_tx, commands_rx) = mpsc::channel(4);
        drop(tokio::spawn(pump(ws, events_tx, commands_rx)));

        Ok(SocketHandle::new(events_rx, commands_tx))
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Drive one socket: forward inbound text frames, answer pings, translate
/// close outcomes, and honor close commands from the supervisor.
async fn pump(
    ws: WsStream,
    events: mpsc::Sender<SocketEvent>,
    mut commands: mpsc::Receiver<SocketCommand>,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(SocketCommand::Close { code, reason }) = command else {
                    // Supervisor dropped the handle; close quietly.
                    let _ = ws_tx.send(WsMessage::Close(None)).await;
                    break;
                };
                debug!(code, reason, "closing socket");
                let frame = CloseFrame {
                    code: code.into(),
                    reason: reason.into(),
                };
                let _ = ws_tx.send(WsMessage::Close(Some(frame))).await;
                // Keep draining until the peer acknowledges or the stream ends.
            }
            message = ws_rx.next() => {
                match message {
                    Some(Ok(WsMessage::Text(text))) => {
                        trace!(len = text.len(), "inbound frame");
                        if events.send(SocketEvent::Frame(text.to_string())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Ping(payload))) => {
                        let _ = ws_tx.send(WsMessage::Pong(payload)).await;
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        let code = frame
                            .as_ref()
                            .map_or(CloseCode::Other(1005), |f| {
                                CloseCode::from_u16(u16::from(f.code))
                            });
                        let _ = events
                            .send(SocketEvent::Closed { code, was_clean: true })
                            .await;
                        break;
                    }
                    Some(Ok(_)) => {} // binary / pong: ignored
                    Some(Err(e)) => {
                        debug!(error = %e, "socket error, treating as abnormal close");
                        let _ = events
                            .send(SocketEvent::Closed {
                                code: CloseCode::Abnormal,
                                was_clean: false,
                            })
                            .await;
                        break;
                    }
                    None => {
                        let _ = events
                            .send(SocketEvent::Closed {
                                code: CloseCode::Abnormal,
                                was_clean: false,
                            })
                            .await;
                        break;
                    }
                }
            }
        }
    }
}

/// Build the realtime endpoint URL with credential query parameters.
pub fn endpoint_url(base: &str, token: &str, business_id: &str) -> Result<String> {
    let mut url = url::Url::parse(base)?;
    let _ = url
        .query_pairs_mut()
        .append_pair("token", token)
        .append_pair("business_id", business_id);
    Ok(url.into())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
