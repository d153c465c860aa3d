//! Per-context key/value storage scope.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::relay::{ChangeRelay, StorageObserver, Subscription};
use crate::CacheError;

/// Transient storage for one browsing context, with its change relay.
///
/// Storage can be blocked (sandboxed frames, privacy settings); every access then
/// fails with [`CacheError::Blocked`].
#[derive(Default)]
pub struct ContextStorage {
    entries: RwLock<BTreeMap<String, String>>,
    relay: ChangeRelay,
    blocked: AtomicBool,
}

impl ContextStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// A storage scope whose every access fails.
    pub fn blocked() -> Self {
        let s = Self::default();
        s.set_blocked(true);
        s
    }

    pub fn set_blocked(&self, blocked: bool) {
        self.blocked.store(blocked, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.blocked.load(Ordering::SeqCst) {
            Err(CacheError::Blocked)
        } else {
            Ok(())
        }
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.check()?;
        Ok(self.entries.read().unwrap_or_else(PoisonError::into_inner).get(key).cloned())
    }

    /// Set one key and notify listeners.
    pub fn set(&self, key: &str, value: impl Into<String>) -> Result<(), CacheError> {
        self.apply([(key.to_string(), Some(value.into()))])
    }

    /// Remove one key and notify listeners.
    pub fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.apply([(key.to_string(), None)])
    }

    /// Apply a batch of writes (`None` removes) as one step, then notify each
    /// written key in order. Listeners never observe a half-applied batch.
    pub fn apply<I>(&self, writes: I) -> Result<(), CacheError>
    where
        I: IntoIterator<Item = (String, Option<String>)>,
    {
        self.check()?;
        let mut touched = Vec::new();
        {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            for (key, value) in writes {
                match value {
                    Some(v) => entries.insert(key.clone(), v),
                    None => entries.remove(&key),
                };
                touched.push(key);
            }
        }
        for key in &touched {
            self.relay.notify(key);
        }
        Ok(())
    }

    /// Snapshot of all keys, in order.
    pub fn keys(&self) -> Result<Vec<String>, CacheError> {
        self.check()?;
        Ok(self.entries.read().unwrap_or_else(PoisonError::into_inner).keys().cloned().collect())
    }

    /// Listen for mutations in this context.
    pub fn subscribe(&self, observer: &Arc<dyn StorageObserver>) -> Subscription {
        self.relay.subscribe(observer)
    }

    pub fn unsubscribe(&self, sub: Subscription) {
        self.relay.unsubscribe(sub);
    }

    pub fn relay(&self) -> &ChangeRelay {
        &self.relay
    }
}
