//! Subscriber registry - the set of clients receiving state broadcasts.
//!
//! The registry only tracks membership; it never sends or closes anything.
//! Connection tasks add themselves and get back a [`Membership`] guard whose
//! drop removes the entry, so no exit path can leak a subscriber. Removal
//! by anyone else (the broadcaster pruning a failed send, or shutdown) fires
//! [`Membership::removed`] so the connection task can close its socket. The
//! broadcast task takes a [`snapshot`](SubscriberRegistry::snapshot) and
//! iterates the copy, so a slow fan-out never holds the lock a new
//! connection needs.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - A poisoned lock is recovered, not propagated: the map is always left
//!   consistent by every critical section

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;

// ============================================================================
// Subscriber Types
// ============================================================================

/// Registry-issued identifier for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Failure to deliver one frame to one subscriber.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("Connection closed")]
    Closed,

    #[error("Send timed out")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Outbound half of a subscriber connection.
///
/// One call sends one complete text frame; implementations serialize
/// concurrent calls so frames are never interleaved.
#[async_trait]
pub trait SubscriberSink: Send + Sync {
    async fn send_text(&self, payload: &str) -> Result<(), SendError>;
}

/// A registered client.
#[derive(Clone)]
pub struct Subscriber {
    pub id: SubscriberId,
    /// Remote address, for logging
    pub remote: String,
    pub sink: Arc<dyn SubscriberSink>,
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Registry
// ============================================================================

struct RegistryEntry {
    subscriber: Subscriber,
    /// Cancelled when the entry leaves the map
    removed: CancellationToken,
}

type SubscribersMap = HashMap<SubscriberId, RegistryEntry>;

/// Thread-safe subscriber set. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    subscribers: Arc<RwLock<SubscribersMap>>,
    next_id: Arc<AtomicU64>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a fresh id for a new connection.
    pub fn next_id(&self) -> SubscriberId {
        SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers a subscriber and returns the guard that owns its membership.
    ///
    /// Adding an id that is already present replaces the subscriber but
    /// keeps its removal signal, so one connection never appears twice.
    pub fn add(&self, subscriber: Subscriber) -> Membership {
        let id = subscriber.id;
        let remote = subscriber.remote.clone();

        let (removed, count) = {
            let mut subs = self.write();
            let removed = match subs.entry(id) {
                Entry::Occupied(mut occupied) => {
                    let entry = occupied.get_mut();
                    entry.subscriber = subscriber;
                    entry.removed.clone()
                }
                Entry::Vacant(vacant) => {
                    let removed = CancellationToken::new();
                    vacant.insert(RegistryEntry {
                        subscriber,
                        removed: removed.clone(),
                    });
                    removed
                }
            };
            (removed, subs.len())
        };
        debug!(subscriber = %id, remote = %remote, subscribers = count, "Added subscriber");

        Membership {
            registry: self.clone(),
            id,
            removed,
        }
    }

    /// Removes a subscriber and signals its [`Membership`]. Returns false if
    /// it was not registered.
    pub fn remove(&self, id: SubscriberId) -> bool {
        let removed = self.write().remove(&id);
        match removed {
            Some(entry) => {
                entry.removed.cancel();
                debug!(subscriber = %id, remote = %entry.subscriber.remote, "Removed subscriber");
                true
            }
            None => false,
        }
    }

    /// Point-in-time copy of every subscriber, in id order.
    pub fn snapshot(&self) -> Vec<Subscriber> {
        let mut subs: Vec<Subscriber> = self
            .read()
            .values()
            .map(|entry| entry.subscriber.clone())
            .collect();
        subs.sort_by_key(|s| s.id);
        subs
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Drops every subscriber (used at shutdown).
    pub fn clear(&self) {
        let drained: Vec<RegistryEntry> = self.write().drain().map(|(_, entry)| entry).collect();
        for entry in drained {
            entry.removed.cancel();
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SubscribersMap> {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SubscribersMap> {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("subscribers", &self.len())
            .finish()
    }
}

/// Scoped registry membership. Dropping it deregisters the subscriber.
#[must_use = "dropping the membership immediately deregisters the subscriber"]
#[derive(Debug)]
pub struct Membership {
    registry: SubscriberRegistry,
    id: SubscriberId,
    removed: CancellationToken,
}

impl Membership {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Completes once the subscriber has been removed from the registry by
    /// anyone other than this guard's drop.
    pub fn removed(&self) -> WaitForCancellationFuture<'_> {
        self.removed.cancelled()
    }
}

impl Drop for Membership {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}
