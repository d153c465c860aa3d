//! Per-tab bookkeeping shared by every coordinator handler.

use dashmap::{DashMap, DashSet};
use fauxtime_core::ids::TabId;
use fauxtime_core::{ContextState, Timestamp};
use std::sync::Arc;

/// Where a tab sits in the propagation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TabPhase {
    #[default]
    Unknown,
    Evaluating,
    /// Restricted URL or a failed evaluation; never injected.
    Skipped,
    /// A one-time reload was requested; seeding happens on the next navigation.
    AwaitingReload,
    Seeded,
}

/// Last status a tab's engine reported through `ContextBecameActive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextStatus {
    pub state: ContextState,
    pub reported_at: Timestamp,
}

/// Registry of tabs the coordinator has touched. Cloning shares the maps.
#[derive(Default, Clone)]
pub struct TabRegistry {
    active: Arc<DashSet<TabId>>,
    reloaded_once: Arc<DashSet<TabId>>,
    phases: Arc<DashMap<TabId, TabPhase>>,
    status: Arc<DashMap<TabId, ContextStatus>>,
}

impl TabRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self, tab: TabId) -> TabPhase {
        self.phases.get(&tab).map_or(TabPhase::Unknown, |p| *p)
    }

    pub fn set_phase(&self, tab: TabId, phase: TabPhase) {
        self.phases.insert(tab, phase);
    }

    /// Claim the tab's single reload. `true` only for the first caller.
    pub fn claim_reload(&self, tab: TabId) -> bool {
        self.reloaded_once.insert(tab)
    }

    pub fn was_reloaded(&self, tab: TabId) -> bool {
        self.reloaded_once.contains(&tab)
    }

    /// Forget every reload; used when faking is disabled.
    pub fn clear_reloads(&self) {
        self.reloaded_once.clear();
    }

    pub fn mark_active(&self, tab: TabId) {
        self.active.insert(tab);
    }

    pub fn mark_inactive(&self, tab: TabId) {
        self.active.remove(&tab);
    }

    pub fn is_active(&self, tab: TabId) -> bool {
        self.active.contains(&tab)
    }

    pub fn active_tabs(&self) -> Vec<TabId> {
        let mut tabs: Vec<TabId> = self.active.iter().map(|t| *t).collect();
        tabs.sort_unstable();
        tabs
    }

    pub fn record_status(&self, tab: TabId, status: ContextStatus) {
        self.status.insert(tab, status);
    }

    pub fn status(&self, tab: TabId) -> Option<ContextStatus> {
        self.status.get(&tab).map(|s| *s)
    }

    /// Drop everything known about `tab`.
    pub fn purge(&self, tab: TabId) {
        self.active.remove(&tab);
        self.reloaded_once.remove(&tab);
        self.phases.remove(&tab);
        self.status.remove(&tab);
    }

    /// Whether the registry holds any trace of `tab`.
    pub fn knows(&self, tab: TabId) -> bool {
        self.active.contains(&tab)
            || self.reloaded_once.contains(&tab)
            || self.phases.contains_key(&tab)
            || self.status.contains_key(&tab)
    }
}
