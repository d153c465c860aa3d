//! The browser-facing seam: tab enumeration, reloads, and bootstrap injection.

use async_trait::async_trait;
use clock_engine::WorldKind;
use fauxtime_core::ids::TabId;
use fauxtime_core::ContextState;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("{0} is gone")]
    TabGone(TabId),
    #[error("injection into {tab} failed: {reason}")]
    InjectionFailed { tab: TabId, reason: String },
    #[error("reload of {tab} failed: {reason}")]
    ReloadFailed { tab: TabId, reason: String },
    #[error("host unavailable: {0}")]
    Unavailable(String),
}

/// What the coordinator knows about an open tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabInfo {
    pub id: TabId,
    pub url: String,
}

/// When an injected script runs relative to page scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunAt {
    /// Before the first page-authored statement.
    DocumentStart,
    DocumentEnd,
}

/// A bootstrap request: seed context storage, then install the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Injection {
    pub world: WorldKind,
    pub run_at: RunAt,
    pub all_frames: bool,
    /// `None` clears any seeded state so the engine serves real time.
    pub seed: Option<ContextState>,
}

impl Injection {
    /// The injection every tab gets: main world, document start, every frame.
    pub fn bootstrap(seed: Option<ContextState>) -> Self {
        Self { world: WorldKind::Main, run_at: RunAt::DocumentStart, all_frames: true, seed }
    }
}

/// Tab lifecycle notifications delivered to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabEvent {
    Created(TabId),
    /// A new document started loading; its contexts are fresh.
    NavigationStarted(TabId),
    Activated(TabId),
    Closed(TabId),
}

impl TabEvent {
    pub fn tab(&self) -> TabId {
        match *self {
            Self::Created(t) | Self::NavigationStarted(t) | Self::Activated(t) | Self::Closed(t) => t,
        }
    }
}

/// Browser operations the coordinator drives. Implementations must tolerate
/// tabs disappearing between calls and report that as [`HostError::TabGone`].
#[async_trait]
pub trait TabHost: Send + Sync {
    async fn list_tabs(&self) -> Result<Vec<TabInfo>, HostError>;

    async fn tab(&self, tab: TabId) -> Result<TabInfo, HostError>;

    async fn reload(&self, tab: TabId) -> Result<(), HostError>;

    /// Returns how many frames were seeded.
    async fn inject(&self, tab: TabId, injection: &Injection) -> Result<usize, HostError>;
}
