//! "Current time" strategies and the realm slot that holds the active one.

use fauxtime_core::{Clock, ContextState, Timestamp};
use std::sync::{Arc, PoisonError, RwLock};

/// Where implicit "now" reads come from.
pub trait NowProvider: Send + Sync {
    /// Current instant as seen by the page.
    fn now(&self) -> Timestamp;

    /// Whether this provider presents counterfeit time.
    fn is_virtual(&self) -> bool {
        false
    }
}

/// The genuine clock.
pub struct RealNow {
    clock: Arc<dyn Clock>,
}

impl RealNow {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl NowProvider for RealNow {
    fn now(&self) -> Timestamp {
        self.clock.now()
    }
}

/// Virtual time: re-evaluates the context state formula against the genuine
/// clock on every call, so a running clock visibly advances.
pub struct VirtualNow {
    state: ContextState,
    clock: Arc<dyn Clock>,
}

impl VirtualNow {
    pub fn new(state: ContextState, clock: Arc<dyn Clock>) -> Self {
        Self { state, clock }
    }

    pub fn state(&self) -> &ContextState {
        &self.state
    }
}

impl NowProvider for VirtualNow {
    fn now(&self) -> Timestamp {
        self.state.virtual_instant(self.clock.now())
    }

    fn is_virtual(&self) -> bool {
        self.state.is_active()
    }
}

/// Per-world globals: the genuine provider, captured once and never lost, and
/// the active provider every facade reads through.
pub struct Realm {
    original: Arc<dyn NowProvider>,
    active: RwLock<Arc<dyn NowProvider>>,
}

impl Realm {
    /// A realm whose active provider is the genuine clock.
    pub fn genuine(clock: Arc<dyn Clock>) -> Self {
        let original: Arc<dyn NowProvider> = Arc::new(RealNow::new(clock));
        Self { active: RwLock::new(Arc::clone(&original)), original }
    }

    /// Current instant through the active provider.
    pub fn now(&self) -> Timestamp {
        self.active().now()
    }

    /// The active provider (Arc clone).
    pub fn active(&self) -> Arc<dyn NowProvider> {
        Arc::clone(&*self.active.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// The genuine provider captured at construction.
    pub fn original(&self) -> Arc<dyn NowProvider> {
        Arc::clone(&self.original)
    }

    /// Swap in a new active provider.
    pub fn install(&self, provider: Arc<dyn NowProvider>) {
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = provider;
    }

    /// Put the genuine provider back.
    pub fn restore(&self) {
        self.install(self.original());
    }

    pub fn is_faking(&self) -> bool {
        self.active().is_virtual()
    }
}
