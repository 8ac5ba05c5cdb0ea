//! Source monitor - turns a `MemorySource` into per-tick game snapshots.
//!
//! The monitor owns the source handle and is the only code that touches it.
//! `refresh()` never returns an error: hook and read failures become the
//! in-band `error` field of the snapshot, and the next refresh starts over
//! from the hook check.
//!
//! # Hook Policy
//!
//! When not hooked, a refresh makes up to `max_attempts` hook attempts
//! spaced `retry_interval` apart (an async sleep, so the scheduler can still
//! be cancelled). Past the cap the tick reports `hook failed ...` instead of
//! blocking the broadcast loop indefinitely.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Address arithmetic is checked; overflow is reported as a read fault

use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use tankwatch_core::{
    EntityState, GameState, MemoryLayout, MemorySource, Position, SourceError,
};

use crate::config::HookConfig;

/// How often and how many times to try hooking within one refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookPolicy {
    pub retry_interval: Duration,
    pub max_attempts: u32,
}

impl From<&HookConfig> for HookPolicy {
    fn from(config: &HookConfig) -> Self {
        Self {
            retry_interval: config.retry_interval(),
            max_attempts: config.max_attempts,
        }
    }
}

impl Default for HookPolicy {
    fn default() -> Self {
        Self::from(&HookConfig::default())
    }
}

/// Why a refresh could not produce data.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MonitorError {
    #[error("hook failed after {attempts} attempts: {source}")]
    HookFailed { attempts: u32, source: SourceError },

    #[error("read of {field} failed: {source}")]
    ReadFault {
        field: &'static str,
        source: SourceError,
    },

    #[error("entity count {count} exceeds slot capacity {capacity}")]
    EntityOverflow { count: u32, capacity: u32 },

    #[error("address of entity {index} overflows the address space")]
    AddressOverflow { index: u32 },
}

impl MonitorError {
    /// The source failure behind this error, if there was one.
    pub fn source_error(&self) -> Option<&SourceError> {
        match self {
            Self::HookFailed { source, .. } | Self::ReadFault { source, .. } => Some(source),
            Self::EntityOverflow { .. } | Self::AddressOverflow { .. } => None,
        }
    }

    /// Operator advice for failures that retrying will not fix.
    pub fn hint(&self) -> Option<&'static str> {
        self.source_error()
            .filter(|e| e.is_permission_denied())
            .map(|_| PTRACE_HINT)
    }
}

const PTRACE_HINT: &str = "reading emulator memory needs ptrace permission: run as the same \
    user with kernel.yama.ptrace_scope = 0, or grant CAP_SYS_PTRACE";

/// Polls game state out of a hooked process.
pub struct SourceMonitor<S: MemorySource> {
    source: S,
    layout: MemoryLayout,
    policy: HookPolicy,
    hooked: bool,
    /// Consecutive failed hook attempts since the last successful hook
    failed_hook_attempts: u32,
    /// Whether the previous refresh failed (used to log only transitions)
    faulted: bool,
}

impl<S: MemorySource> SourceMonitor<S> {
    /// Creates an unhooked monitor.
    pub fn new(source: S, layout: MemoryLayout, policy: HookPolicy) -> Self {
        Self {
            source,
            layout,
            policy,
            hooked: false,
            failed_hook_attempts: 0,
            faulted: false,
        }
    }

    /// Returns true if the monitor currently believes it holds a hook.
    pub fn is_hooked(&self) -> bool {
        self.hooked
    }

    /// Consecutive failed hook attempts since the last successful hook.
    pub fn failed_hook_attempts(&self) -> u32 {
        self.failed_hook_attempts
    }

    /// Returns the underlying source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Produces one snapshot. Failures are reported in `GameState::error`.
    pub async fn refresh(&mut self) -> GameState {
        match self.try_refresh().await {
            Ok(state) => {
                if self.faulted {
                    info!("Game state source recovered");
                    self.faulted = false;
                }
                state
            }
            Err(e) => {
                if !self.faulted {
                    match e.hint() {
                        Some(hint) => warn!(error = %e, hint, "Game state unavailable"),
                        None => warn!(error = %e, "Game state unavailable"),
                    }
                    self.faulted = true;
                } else {
                    debug!(error = %e, "Game state still unavailable");
                }
                GameState::failed(e.to_string())
            }
        }
    }

    /// Unhooks if hooked. Safe to call any number of times.
    pub fn cleanup(&mut self) {
        if self.hooked {
            self.source.unhook();
            self.hooked = false;
            info!("Unhooked from game process");
        }
    }

    async fn try_refresh(&mut self) -> Result<GameState, MonitorError> {
        self.ensure_hooked().await?;

        match self.read_state() {
            Ok(state) => Ok(state),
            Err(e) => {
                // The source decides whether the fault cost us the hook.
                if !self.source.is_hooked() {
                    debug!("Source lost its hook, will re-hook next tick");
                    self.hooked = false;
                }
                Err(e)
            }
        }
    }

    async fn ensure_hooked(&mut self) -> Result<(), MonitorError> {
        if self.hooked {
            return Ok(());
        }

        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.source.hook() {
                Ok(()) => {
                    info!(
                        attempt,
                        previous_failures = self.failed_hook_attempts,
                        "Hooked game process"
                    );
                    self.hooked = true;
                    self.failed_hook_attempts = 0;
                    return Ok(());
                }
                Err(e) => {
                    self.failed_hook_attempts = self.failed_hook_attempts.saturating_add(1);
                    debug!(attempt, max_attempts, error = %e, "Hook attempt failed");

                    if attempt >= max_attempts {
                        return Err(MonitorError::HookFailed {
                            attempts: attempt,
                            source: e,
                        });
                    }
                }
            }

            sleep(self.policy.retry_interval).await;
            attempt += 1;
        }
    }

    /// Reads every field in a fixed order, stopping at the first fault.
    fn read_state(&mut self) -> Result<GameState, MonitorError> {
        let layout = &self.layout;
        let source = &mut self.source;

        let lives = read_byte(source, "lives", layout.lives)?;
        let level_number = read_byte(source, "levelNumber", layout.level_number)?;
        let player = Position::new(
            read_float(source, "player.x", layout.player_x)?,
            read_float(source, "player.y", layout.player_y)?,
        );
        let num_starting_entities =
            read_byte(source, "numStartingEntities", layout.num_starting_entities)?;
        let num_remaining_entities =
            read_byte(source, "numRemainingEntities", layout.num_remaining_entities)?;

        let table = &layout.entities;
        if num_starting_entities > table.max_slots {
            return Err(MonitorError::EntityOverflow {
                count: num_starting_entities,
                capacity: table.max_slots,
            });
        }

        let offsets = table.offsets;
        let mut entities = Vec::with_capacity(num_starting_entities as usize);
        for index in 0..num_starting_entities {
            let address = |offset: u32| {
                table
                    .field_address(index, offset)
                    .ok_or(MonitorError::AddressOverflow { index })
            };

            entities.push(EntityState {
                x: read_float(source, "entity.x", address(offsets.x)?)?,
                y: read_float(source, "entity.y", address(offsets.y)?)?,
                color_code: read_byte(source, "entity.color", address(offsets.color)?)?,
                alive: read_byte(source, "entity.alive", address(offsets.alive)?)? != 0,
            });
        }

        Ok(GameState {
            lives,
            level_number,
            player,
            num_starting_entities,
            num_remaining_entities,
            entities,
            error: None,
        })
    }
}

impl<S: MemorySource> Drop for SourceMonitor<S> {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn read_byte<S: MemorySource>(
    source: &mut S,
    field: &'static str,
    address: u32,
) -> Result<u32, MonitorError> {
    source
        .read_u8(address)
        .map(u32::from)
        .map_err(|source| MonitorError::ReadFault { field, source })
}

fn read_float<S: MemorySource>(
    source: &mut S,
    field: &'static str,
    address: u32,
) -> Result<f32, MonitorError> {
    source
        .read_f32(address)
        .map_err(|source| MonitorError::ReadFault { field, source })
}
