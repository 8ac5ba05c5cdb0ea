//! Connection handler for individual WebSocket clients.
//!
//! Each accepted TCP connection gets its own `ConnectionHandler` that:
//! - Performs the WebSocket opening handshake (with a timeout)
//! - Registers the client as a subscriber
//! - Drains and discards anything the client sends
//! - Deregisters on every exit path via the registry's membership guard
//! - Closes the socket when the broadcaster prunes it from the registry
//!
//! The handler never touches the memory source; state frames are written
//! by the broadcast scheduler through the client's [`WsSink`].
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Connection errors are logged and result in graceful disconnect

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{accept_async, WebSocketStream};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info};

use crate::registry::{SendError, Subscriber, SubscriberRegistry, SubscriberSink};

type WsWriter = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsReader = SplitStream<WebSocketStream<TcpStream>>;

// ============================================================================
// Outbound Sink
// ============================================================================

/// Write half of a client connection, shared with the broadcaster.
///
/// The mutex makes each `send_text` write one whole frame.
pub struct WsSink {
    writer: Mutex<WsWriter>,
}

impl WsSink {
    fn new(writer: WsWriter) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Sends a Close frame, ignoring failures (the peer may be gone).
    async fn close(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.send(Message::Close(None)).await;
    }
}

#[async_trait]
impl SubscriberSink for WsSink {
    async fn send_text(&self, payload: &str) -> Result<(), SendError> {
        let mut writer = self.writer.lock().await;
        writer
            .send(Message::Text(payload.to_string()))
            .await
            .map_err(classify_send_error)
    }
}

fn classify_send_error(err: WsError) -> SendError {
    match err {
        WsError::ConnectionClosed | WsError::AlreadyClosed => SendError::Closed,
        other => SendError::Transport(other.to_string()),
    }
}

// ============================================================================
// Connection Handler
// ============================================================================

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Client sent a Close frame
    ClientClosed,
    /// Stream ended without a Close frame
    Eof,
    /// Server is shutting down
    Shutdown,
    /// Removed from the registry after a failed or timed-out send
    Pruned,
    /// Read failed
    Error(String),
}

/// Lifecycle task for a single client connection.
pub struct ConnectionHandler {
    stream: TcpStream,
    peer: SocketAddr,
    registry: SubscriberRegistry,
    cancel_token: CancellationToken,
    handshake_timeout: Duration,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        registry: SubscriberRegistry,
        cancel_token: CancellationToken,
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            stream,
            peer,
            registry,
            cancel_token,
            handshake_timeout,
        }
    }

    /// Runs the connection until it closes. Returns why it closed.
    pub async fn run(self) -> Result<CloseReason, ConnectionError> {
        let peer = self.peer;
        debug!(remote = %peer, "New TCP connection");

        let ws = match timeout(self.handshake_timeout, accept_async(self.stream)).await {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => return Err(ConnectionError::Handshake(e.to_string())),
            Err(_) => return Err(ConnectionError::HandshakeTimeout),
        };

        let (writer, mut reader) = ws.split();
        let sink = Arc::new(WsSink::new(writer));

        let membership = self.registry.add(Subscriber {
            id: self.registry.next_id(),
            remote: peer.to_string(),
            sink: sink.clone(),
        });
        info!(subscriber = %membership.id(), remote = %peer, "Client subscribed");

        let reason = drain(&mut reader, &self.cancel_token, membership.removed()).await;

        // Deregister before the close handshake so no broadcast races it.
        let id = membership.id();
        drop(membership);
        // A pruned peer may have stopped reading; don't wait on it forever.
        if timeout(self.handshake_timeout, sink.close()).await.is_err() {
            debug!(subscriber = %id, "Close frame not flushed");
        }

        info!(subscriber = %id, remote = %peer, reason = ?reason, "Client disconnected");
        Ok(reason)
    }
}

/// Reads and discards client frames until the connection ends or the
/// subscriber is removed from the registry.
async fn drain(
    reader: &mut WsReader,
    cancel_token: &CancellationToken,
    removed: WaitForCancellationFuture<'_>,
) -> CloseReason {
    tokio::pin!(removed);
    loop {
        tokio::select! {
            biased;

            _ = cancel_token.cancelled() => return CloseReason::Shutdown,

            _ = &mut removed => return CloseReason::Pruned,

            msg = reader.next() => match msg {
                None => return CloseReason::Eof,
                Some(Ok(Message::Close(frame))) => {
                    debug!(frame = ?frame, "Client sent close frame");
                    return CloseReason::ClientClosed;
                }
                Some(Ok(_)) => {
                    // Inbound data is not part of the protocol
                }
                Some(Err(e)) => return CloseReason::Error(e.to_string()),
            },
        }
    }
}

/// Errors that end a connection before it became a subscriber.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("WebSocket handshake failed: {0}")]
    Handshake(String),

    #[error("WebSocket handshake timed out")]
    HandshakeTimeout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_closed_errors() {
        assert_eq!(
            classify_send_error(WsError::ConnectionClosed),
            SendError::Closed
        );
        assert_eq!(classify_send_error(WsError::AlreadyClosed), SendError::Closed);
    }

    #[test]
    fn test_classify_io_error() {
        let err = WsError::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "broken pipe",
        ));
        assert!(matches!(classify_send_error(err), SendError::Transport(msg) if msg.contains("broken pipe")));
    }

    #[test]
    fn test_connection_error_display() {
        let err = ConnectionError::Handshake("bad request".to_string());
        assert!(err.to_string().contains("bad request"));
        assert_eq!(
            ConnectionError::HandshakeTimeout.to_string(),
            "WebSocket handshake timed out"
        );
    }
}
