//! State service - the explicitly constructed owner of every daemon part.
//!
//! A [`StateService`] owns the subscriber registry and the source monitor.
//! Binding hands the monitor to a broadcast scheduler and adds the
//! WebSocket server. Nothing lives in globals, so tests can build as many
//! services as they like.
//!
//! ```text
//!                 StateService::new(config, source)
//!                              │ bind()
//!                              ▼
//!   ┌──────────────────── BoundService ────────────────────┐
//!   │  StateServer ──add──▶ SubscriberRegistry ◀─snapshot─ │
//!   │                                    BroadcastScheduler│
//!   └──────────────────────────┬───────────────────────────┘
//!                              │ run_bound() until cancel
//!                              ▼
//!               scheduler awaited, source unhooked
//! ```

use std::net::SocketAddr;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use tankwatch_core::MemorySource;

use crate::broadcast::{BroadcastScheduler, ScheduleConfig};
use crate::config::Config;
use crate::monitor::{HookPolicy, SourceMonitor};
use crate::registry::SubscriberRegistry;
use crate::server::{ServerError, StateServer};

/// Daemon service before it has bound its listener.
pub struct StateService<S: MemorySource> {
    config: Config,
    registry: SubscriberRegistry,
    monitor: SourceMonitor<S>,
}

impl<S: MemorySource + 'static> StateService<S> {
    /// Builds the registry and monitor. Nothing is hooked or bound yet.
    pub fn new(config: Config, source: S) -> Self {
        let registry = SubscriberRegistry::new();
        let monitor = SourceMonitor::new(
            source,
            config.layout.clone(),
            HookPolicy::from(&config.hook),
        );

        Self {
            config,
            registry,
            monitor,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &SubscriberRegistry {
        &self.registry
    }

    /// Binds the WebSocket listener and builds the scheduler around the monitor.
    ///
    /// Cancelling `cancel_token` later stops both the server and the
    /// scheduler. A bind failure is fatal for the service.
    pub async fn bind(self, cancel_token: CancellationToken) -> Result<BoundService<S>, ServiceError> {
        let cancel_token = cancel_token.child_token();
        let address = self.config.server.bind_address();

        let server = StateServer::bind(
            &address,
            self.registry.clone(),
            cancel_token.clone(),
            self.config.server.handshake_timeout(),
        )
        .await?;

        let scheduler = BroadcastScheduler::new(
            self.monitor,
            self.registry,
            schedule_config(&self.config),
            cancel_token.clone(),
        );

        Ok(BoundService {
            server,
            scheduler,
            cancel_token,
        })
    }

    /// Binds, then serves until `cancel_token` is cancelled.
    pub async fn run(self, cancel_token: CancellationToken) -> Result<(), ServiceError> {
        self.bind(cancel_token).await?.run_bound().await
    }
}

/// Service with a bound listener, ready to serve.
pub struct BoundService<S: MemorySource> {
    server: StateServer,
    scheduler: BroadcastScheduler<S>,
    cancel_token: CancellationToken,
}

impl<S: MemorySource + 'static> BoundService<S> {
    /// Address the server is listening on.
    pub fn local_addr(&self) -> Result<SocketAddr, ServiceError> {
        Ok(self.server.local_addr()?)
    }

    pub fn registry(&self) -> &SubscriberRegistry {
        self.server.registry()
    }

    /// Serves until cancelled. Returns only after the scheduler has exited,
    /// so the memory source has been unhooked by then.
    pub async fn run_bound(self) -> Result<(), ServiceError> {
        let Self {
            server,
            scheduler,
            cancel_token,
        } = self;

        let scheduler_handle = tokio::spawn(scheduler.run());

        let server_result = server.run().await;
        // The server only returns early on error; stop the scheduler too.
        cancel_token.cancel();

        if let Err(e) = scheduler_handle.await {
            error!(error = %e, "Broadcast scheduler task failed");
            return Err(ServiceError::Scheduler(e.to_string()));
        }

        server_result?;
        info!("State service stopped");
        Ok(())
    }
}

fn schedule_config(config: &Config) -> ScheduleConfig {
    ScheduleConfig {
        period: config.poll.interval(),
        send_timeout: config.server.send_timeout(),
        idle: config.poll.idle,
    }
}

/// Errors that stop the service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Failed to bind {address}: {reason}")]
    Bind { address: String, reason: String },

    #[error("Server error: {0}")]
    Server(ServerError),

    #[error("Broadcast scheduler task failed: {0}")]
    Scheduler(String),
}

impl From<ServerError> for ServiceError {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::Bind { address, error } => ServiceError::Bind {
                address,
                reason: error,
            },
            other => ServiceError::Server(other),
        }
    }
}
