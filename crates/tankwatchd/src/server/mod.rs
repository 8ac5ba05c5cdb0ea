//! WebSocket server that admits state subscribers.
//!
//! The server:
//! - Listens on a TCP address for WebSocket clients
//! - Spawns a ConnectionHandler for each client
//! - Registers each client with the shared subscriber registry
//! - Supports graceful shutdown via CancellationToken
//!
//! Broadcasting is not done here; the scheduler in [`crate::broadcast`]
//! writes to whatever the registry holds at each tick.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   StateServer   │
//! │                 │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌────────────────────┐
//! │ConnectionHandler│────▶│ SubscriberRegistry │
//! │   (per client)  │     │                    │
//! └─────────────────┘     └─────────┬──────────┘
//!                                   │ snapshot()
//!                                   ▼
//!                         ┌────────────────────┐
//!                         │ BroadcastScheduler │
//!                         └────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?` or pattern matching
//! - Accept errors are logged and the server keeps listening

mod connection;

pub use connection::{CloseReason, ConnectionError, ConnectionHandler, WsSink};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::registry::SubscriberRegistry;

/// WebSocket listener feeding the subscriber registry.
pub struct StateServer {
    listener: TcpListener,

    registry: SubscriberRegistry,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Upper bound on the opening handshake of one client
    handshake_timeout: Duration,

    /// Total connections accepted, for logging
    connection_counter: AtomicU64,
}

impl StateServer {
    /// Binds the listener. The server does not accept until [`run`](Self::run).
    ///
    /// Port 0 binds an ephemeral port; see [`local_addr`](Self::local_addr).
    pub async fn bind(
        address: &str,
        registry: SubscriberRegistry,
        cancel_token: CancellationToken,
        handshake_timeout: Duration,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| ServerError::Bind {
                address: address.to_string(),
                error: e.to_string(),
            })?;

        Ok(Self {
            listener,
            registry,
            cancel_token,
            handshake_timeout,
            connection_counter: AtomicU64::new(0),
        })
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener
            .local_addr()
            .map_err(|e| ServerError::LocalAddr(e.to_string()))
    }

    pub fn registry(&self) -> &SubscriberRegistry {
        &self.registry
    }

    /// Accepts connections until the cancellation token is triggered.
    pub async fn run(self) -> Result<(), ServerError> {
        let address = self.local_addr()?;
        info!(address = %address, "State server listening");

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let conn_num = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            self.handle_connection(stream, peer, conn_num);
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        self.cleanup();
        Ok(())
    }

    /// Spawns the handler task for one accepted connection.
    fn handle_connection(&self, stream: TcpStream, peer: SocketAddr, connection_number: u64) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(remote = %peer, error = %e, "Failed to set TCP_NODELAY");
        }

        let handler = ConnectionHandler::new(
            stream,
            peer,
            self.registry.clone(),
            self.cancel_token.child_token(),
            self.handshake_timeout,
        );

        tokio::spawn(async move {
            if let Err(e) = handler.run().await {
                warn!(remote = %peer, connection = connection_number, error = %e, "Connection rejected");
            }
        });
    }

    fn cleanup(&self) {
        let remaining = self.registry.len();
        self.registry.clear();
        info!(
            dropped_subscribers = remaining,
            total_connections = self.connection_counter.load(Ordering::Relaxed),
            "Server cleanup complete"
        );
    }
}

/// Errors that can occur in the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {address}: {error}")]
    Bind { address: String, error: String },

    #[error("Failed to read local address: {0}")]
    LocalAddr(String),
}
