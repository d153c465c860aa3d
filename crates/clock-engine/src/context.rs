//! A browsing context as the engine sees it: one storage scope shared by two
//! execution worlds, each with its own globals and install marker.

use context_cache::ContextStorage;
use fauxtime_core::ids::ContextId;
use fauxtime_core::{Clock, ContextState};
use std::sync::{Arc, OnceLock};

use crate::date::DateConstructor;
use crate::engine::ClockEngine;
use crate::format::{DateTimeFormat, FormatOptions};
use crate::provider::Realm;
use crate::EngineError;

/// Which execution world code runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorldKind {
    /// The page's own world; overrides here are visible to page scripts.
    Main,
    /// The extension-privileged world; overrides here are invisible to the page.
    Isolated,
}

impl WorldKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Isolated => "isolated",
        }
    }
}

/// Receives the fire-and-forget "context became active" notice.
pub trait ActivationSink: Send + Sync {
    fn context_became_active(&self, context: ContextId, state: &ContextState);
}

/// One world's globals. The engine slot doubles as the install marker.
pub struct World {
    kind: WorldKind,
    realm: Arc<Realm>,
    engine: OnceLock<Arc<ClockEngine>>,
}

impl World {
    fn new(kind: WorldKind, clock: Arc<dyn Clock>) -> Self {
        Self { kind, realm: Arc::new(Realm::genuine(clock)), engine: OnceLock::new() }
    }

    pub fn kind(&self) -> WorldKind {
        self.kind
    }

    pub fn realm(&self) -> &Arc<Realm> {
        &self.realm
    }

    /// The installed engine, if any.
    pub fn engine(&self) -> Option<Arc<ClockEngine>> {
        self.engine.get().cloned()
    }

    pub(crate) fn engine_slot(&self) -> &OnceLock<Arc<ClockEngine>> {
        &self.engine
    }

    /// This world's date constructor, whether or not an engine is installed.
    pub fn date(&self) -> DateConstructor {
        DateConstructor::new(Arc::clone(&self.realm))
    }

    /// This world's calendar formatter constructor.
    pub fn date_time_format(&self, options: FormatOptions) -> Result<DateTimeFormat, EngineError> {
        DateTimeFormat::new(Arc::clone(&self.realm), options)
    }
}

/// A loaded page or frame. Dropped (and replaced) on navigation.
pub struct BrowsingContext {
    id: ContextId,
    storage: Arc<ContextStorage>,
    clock: Arc<dyn Clock>,
    main: World,
    isolated: World,
    sink: Option<Arc<dyn ActivationSink>>,
}

impl BrowsingContext {
    /// A fresh context with its own storage scope.
    pub fn new(id: ContextId, clock: Arc<dyn Clock>) -> Self {
        Self::with_storage(id, Arc::new(ContextStorage::new()), clock)
    }

    /// A fresh context over a caller-provided storage scope (e.g. a blocked one).
    pub fn with_storage(id: ContextId, storage: Arc<ContextStorage>, clock: Arc<dyn Clock>) -> Self {
        Self {
            id,
            storage,
            main: World::new(WorldKind::Main, Arc::clone(&clock)),
            isolated: World::new(WorldKind::Isolated, Arc::clone(&clock)),
            clock,
            sink: None,
        }
    }

    /// Route activation notices to `sink`.
    #[must_use]
    pub fn with_activation_sink(mut self, sink: Arc<dyn ActivationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn storage(&self) -> &Arc<ContextStorage> {
        &self.storage
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub(crate) fn activation_sink(&self) -> Option<Arc<dyn ActivationSink>> {
        self.sink.clone()
    }

    pub fn world(&self, kind: WorldKind) -> &World {
        match kind {
            WorldKind::Main => &self.main,
            WorldKind::Isolated => &self.isolated,
        }
    }

    /// What page-authored scripts see.
    pub fn page(&self) -> &World {
        &self.main
    }
}
