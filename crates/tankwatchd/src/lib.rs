//! Tankwatch daemon - emulator memory monitor and WebSocket broadcaster
//!
//! This crate provides the daemon behind the `tankwatchd` binary:
//! - `monitor` - Hooks the game process and reads one consistent snapshot
//! - `registry` - Set of connected subscribers
//! - `broadcast` - Periodic refresh and fan-out to every subscriber
//! - `server` - WebSocket listener and per-connection tasks
//! - `service` - Owns all of the above; the unit the binary runs
//! - `dolphin` - `MemorySource` for a Dolphin process on Linux
//! - `config` - TOML configuration
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     tankwatchd daemon                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐    │
//! │  │  StateServer    │────▶│    SubscriberRegistry       │    │
//! │  │  (WebSocket)    │ add │    (membership set)         │    │
//! │  └────────┬────────┘     └──────────────┬──────────────┘    │
//! │           │                             │ snapshot          │
//! │           │ connections                 ▼                   │
//! │           ▼              ┌─────────────────────────────┐    │
//! │  ┌─────────────────┐     │    BroadcastScheduler       │    │
//! │  │ConnectionHandler│◀────│  (one task, every period)   │    │
//! │  │  (per client)   │ send└──────────────┬──────────────┘    │
//! │  └─────────────────┘                    │ refresh           │
//! │                          ┌──────────────▼──────────────┐    │
//! │                          │  SourceMonitor ─▶ Dolphin   │    │
//! │                          └─────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Source failures become data; transport failures drop one subscriber

pub mod broadcast;
pub mod cli;
pub mod config;
pub mod dolphin;
pub mod monitor;
pub mod registry;
pub mod server;
pub mod service;

#[cfg(test)]
mod testing;
