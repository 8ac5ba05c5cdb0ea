//! tankwatch Core - Shared types for game-state streaming
//!
//! This crate provides the domain types shared between the daemon
//! (`tankwatchd`) and anything that consumes its snapshots:
//! - `state` - the per-tick snapshot pushed to WebSocket clients
//! - `source` - the `MemorySource` capability for reading a hooked process
//! - `layout` - where each field lives in the target's memory
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod layout;
pub mod source;
pub mod state;

// Re-exports for convenience
pub use error::{LayoutError, SourceError, SourceResult};
pub use layout::{EntityLayout, EntityOffsets, MemoryLayout, DEFAULT_ENTITY_SLOTS};
pub use source::MemorySource;
pub use state::{EntityState, GameState, Position, TankColor};
