//! Same-context change relay.
//!
//! Listeners are held weakly: a dropped engine stops receiving notifications
//! without having to unsubscribe, and the storage never keeps its listeners alive.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tracing::trace;

/// Receives a key name whenever context storage is mutated.
pub trait StorageObserver: Send + Sync {
    /// Called synchronously after the mutation is visible to readers.
    fn on_key_changed(&self, key: &str);
}

/// Handle returned by [`ChangeRelay::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription(u64);

/// Fan-out of key-change notifications to every live listener in one context.
#[derive(Default)]
pub struct ChangeRelay {
    next: AtomicU64,
    listeners: RwLock<Vec<(u64, Weak<dyn StorageObserver>)>>,
}

impl ChangeRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `observer`. The relay does not keep it alive.
    pub fn subscribe(&self, observer: &Arc<dyn StorageObserver>) -> Subscription {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::downgrade(observer)));
        Subscription(id)
    }

    /// Remove a listener; unknown handles are ignored.
    pub fn unsubscribe(&self, sub: Subscription) {
        self.listeners.write().unwrap_or_else(PoisonError::into_inner).retain(|(id, _)| *id != sub.0);
    }

    /// Number of live listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, w)| w.strong_count() > 0)
            .count()
    }

    /// Notify every live listener that `key` changed.
    ///
    /// The listener list is snapshotted first, so listeners may read storage or
    /// (un)subscribe from inside the callback.
    pub fn notify(&self, key: &str) {
        let live: Vec<Arc<dyn StorageObserver>> = {
            let mut guard = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
            guard.retain(|(_, w)| w.strong_count() > 0);
            guard.iter().filter_map(|(_, w)| w.upgrade()).collect()
        };
        trace!(key, listeners = live.len(), "relaying storage change");
        for listener in live {
            listener.on_key_changed(key);
        }
    }
}
