//! Thread-safe registry of live dashboard subscribers.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use uuid::Uuid;

/// Identity of one live-update subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Handle to one connected dashboard session. Frames pushed into `tx` are
/// forwarded to the session's socket by its connection task; a closed `tx`
/// means the session is gone.
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub id: SubscriberId,
    pub tx: mpsc::Sender<String>,
}

/// Registration-ordered set of active subscribers.
///
/// All mutation (connect, disconnect, eviction) and the snapshot read used
/// by broadcast serialize through one lock. A snapshot is an owned copy, so
/// a broadcast iterating it never observes concurrent registry mutation; a
/// session attaching mid-broadcast simply misses that broadcast.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<Vec<Subscriber>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber for one physical connection and return its id.
    pub async fn register(&self, tx: mpsc::Sender<String>) -> SubscriberId {
        let id = SubscriberId::new();
        let mut subscribers = self.inner.write().await;
        subscribers.push(Subscriber { id, tx });
        debug!(subscriber = %id, active = subscribers.len(), "subscriber registered");
        id
    }

    /// Remove a subscriber. A no-op if it was already removed.
    pub async fn unregister(&self, id: SubscriberId) {
        let mut subscribers = self.inner.write().await;
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        if subscribers.len() < before {
            debug!(subscriber = %id, active = subscribers.len(), "subscriber unregistered");
        }
    }

    /// Owned copy of the active set, in registration order.
    pub async fn snapshot(&self) -> Vec<Subscriber> {
        self.inner.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}
