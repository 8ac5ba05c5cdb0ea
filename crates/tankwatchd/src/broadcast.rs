//! Broadcast scheduler - the periodic refresh and fan-out loop.
//!
//! Each tick:
//! 1. Refresh the game state through the [`SourceMonitor`]
//! 2. Serialize it once
//! 3. Send it to every subscriber in a registry snapshot, concurrently
//! 4. Remove subscribers whose send failed
//! 5. Sleep for what is left of the period
//!
//! # State Machine
//!
//! ```text
//! Idle ──▶ Refreshing ──▶ Broadcasting ──▶ Sleeping ──▶ Idle
//!              │                               │
//!              └────────── cancelled ──────────┴──▶ cleanup, exit
//! ```
//!
//! Cancellation is honoured while refreshing (which may be waiting out a
//! hook retry) and while sleeping. A fan-out always runs to completion so a
//! subscriber never sees half a frame; each send is bounded by a timeout.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Send failures are logged and resolved by deregistration

use std::time::Duration;

use futures_util::future::join_all;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use tankwatch_core::{GameState, MemorySource};

use crate::config::IdlePolicy;
use crate::monitor::SourceMonitor;
use crate::registry::{SendError, Subscriber, SubscriberRegistry};

/// Scheduler timing settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleConfig {
    /// Target time between tick starts
    pub period: Duration,
    /// Upper bound on one send to one subscriber
    pub send_timeout: Duration,
    pub idle: IdlePolicy,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(1),
            send_timeout: Duration::from_secs(2),
            idle: IdlePolicy::Refresh,
        }
    }
}

/// What happened during one tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Whether the source was polled this tick
    pub refreshed: bool,
    /// In-band error of the produced state, if any
    pub source_error: Option<String>,
    /// Subscribers that received the frame
    pub delivered: usize,
    /// Subscribers removed after a failed send
    pub dropped: usize,
    /// Time spent refreshing and broadcasting
    pub elapsed: Duration,
}

/// Periodic refresh + broadcast task.
///
/// Owns the monitor, so it is the single writer of the memory source.
pub struct BroadcastScheduler<S: MemorySource> {
    monitor: SourceMonitor<S>,
    registry: SubscriberRegistry,
    config: ScheduleConfig,
    cancel_token: CancellationToken,
    ticks: u64,
}

impl<S: MemorySource> BroadcastScheduler<S> {
    pub fn new(
        monitor: SourceMonitor<S>,
        registry: SubscriberRegistry,
        config: ScheduleConfig,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            monitor,
            registry,
            config,
            cancel_token,
            ticks: 0,
        }
    }

    /// Number of completed ticks.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn monitor(&self) -> &SourceMonitor<S> {
        &self.monitor
    }

    /// Runs until cancelled, then unhooks the source.
    pub async fn run(mut self) {
        info!(
            period_ms = self.config.period.as_millis() as u64,
            idle = ?self.config.idle,
            "Broadcast scheduler started"
        );

        let cancel_token = self.cancel_token.clone();
        loop {
            let started = Instant::now();

            let refreshed = tokio::select! {
                biased;

                _ = cancel_token.cancelled() => None,
                state = self.refresh_for_tick() => Some(state),
            };
            let Some(state) = refreshed else {
                break;
            };

            let report = self.broadcast(state, started).await;
            debug!(
                tick = self.ticks,
                refreshed = report.refreshed,
                delivered = report.delivered,
                dropped = report.dropped,
                elapsed_ms = report.elapsed.as_millis() as u64,
                error = ?report.source_error,
                "Tick complete"
            );

            // Drift correction: a slow tick shortens the sleep, never below zero.
            let remaining = self.config.period.saturating_sub(started.elapsed());
            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => break,
                _ = sleep(remaining) => {}
            }
        }

        info!(ticks = self.ticks, "Broadcast scheduler shutting down");
        self.monitor.cleanup();
    }

    /// Runs one tick without sleeping.
    pub async fn tick(&mut self) -> TickReport {
        let started = Instant::now();
        let state = self.refresh_for_tick().await;
        self.broadcast(state, started).await
    }

    /// Refreshes unless idle policy says to skip. `None` means skipped.
    async fn refresh_for_tick(&mut self) -> Option<GameState> {
        if self.config.idle == IdlePolicy::Skip && self.registry.is_empty() {
            return None;
        }
        Some(self.monitor.refresh().await)
    }

    async fn broadcast(&mut self, state: Option<GameState>, started: Instant) -> TickReport {
        self.ticks += 1;

        let mut report = TickReport {
            refreshed: state.is_some(),
            ..TickReport::default()
        };
        let Some(state) = state else {
            report.elapsed = started.elapsed();
            return report;
        };
        report.source_error = state.error.clone();

        let subscribers = self.registry.snapshot();
        if subscribers.is_empty() {
            report.elapsed = started.elapsed();
            return report;
        }

        let payload = match state.to_json() {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "Failed to serialize game state");
                report.elapsed = started.elapsed();
                return report;
            }
        };

        let send_timeout = self.config.send_timeout;
        let results = join_all(
            subscribers
                .iter()
                .map(|sub| send_with_timeout(sub, &payload, send_timeout)),
        )
        .await;

        for (subscriber, result) in subscribers.iter().zip(results) {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    debug!(
                        subscriber = %subscriber.id,
                        remote = %subscriber.remote,
                        error = %e,
                        "Dropping subscriber after failed send"
                    );
                    if self.registry.remove(subscriber.id) {
                        report.dropped += 1;
                    }
                }
            }
        }

        report.elapsed = started.elapsed();
        report
    }
}

async fn send_with_timeout(
    subscriber: &Subscriber,
    payload: &str,
    limit: Duration,
) -> Result<(), SendError> {
    match timeout(limit, subscriber.sink.send_text(payload)).await {
        Ok(result) => result,
        Err(_) => Err(SendError::Timeout),
    }
}
