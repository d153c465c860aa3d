//! The installed engine: reads the context state, picks the provider, and
//! re-evaluates on every relevant relay notification.

use context_cache::{is_state_key, read_state, ContextStorage, StorageObserver};
use fauxtime_core::ids::ContextId;
use fauxtime_core::{Clock, ContextState, Timestamp};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, debug_span, info, warn};

use crate::context::{ActivationSink, BrowsingContext, WorldKind};
use crate::date::DateConstructor;
use crate::format::{DateTimeFormat, FormatOptions};
use crate::provider::{Realm, VirtualNow};
use crate::EngineError;

/// Clock engine bound to one world of one browsing context.
pub struct ClockEngine {
    context: ContextId,
    world: WorldKind,
    storage: Arc<ContextStorage>,
    realm: Arc<Realm>,
    clock: Arc<dyn Clock>,
    sink: Option<Arc<dyn ActivationSink>>,
    last_reported: Mutex<Option<ContextState>>,
    evaluations: AtomicU64,
}

impl ClockEngine {
    /// Install the engine into `world` of `ctx`, or return the one already there.
    ///
    /// Precondition: for the page to never observe real time, this must run before
    /// the first statement of any page-authored script in that world. The caller
    /// (the injection host) is responsible for that ordering.
    pub fn install(ctx: &BrowsingContext, world: WorldKind) -> Arc<Self> {
        let slot = ctx.world(world);
        if let Some(existing) = slot.engine() {
            debug!(context = %ctx.id(), world = world.as_str(), "clock engine already installed");
            return existing;
        }
        let engine = slot.engine_slot().get_or_init(|| {
            let engine = Arc::new(Self {
                context: ctx.id(),
                world,
                storage: Arc::clone(ctx.storage()),
                realm: Arc::clone(slot.realm()),
                clock: Arc::clone(ctx.clock()),
                sink: ctx.activation_sink(),
                last_reported: Mutex::new(None),
                evaluations: AtomicU64::new(0),
            });
            let observer: Arc<dyn StorageObserver> = engine.clone();
            ctx.storage().subscribe(&observer);
            engine.evaluate();
            info!(
                context = %ctx.id(),
                world = world.as_str(),
                faking = engine.is_faking(),
                "clock engine installed"
            );
            engine
        });
        Arc::clone(engine)
    }

    /// Re-read the context state from scratch and swap providers accordingly.
    ///
    /// Unreadable storage degrades to real time.
    pub fn evaluate(&self) {
        let _span = debug_span!("engine.reevaluate", context = %self.context, world = self.world.as_str())
            .entered();
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        let state = match read_state(&self.storage) {
            Ok(state) => state.filter(ContextState::is_active),
            Err(e) => {
                warn!(context = %self.context, error = %e, "context state unreadable; serving real time");
                None
            }
        };
        match state {
            Some(state) => {
                self.realm.install(Arc::new(VirtualNow::new(state, Arc::clone(&self.clock))));
                self.report(state);
            }
            None => {
                self.realm.restore();
                *self.last_reported.lock().unwrap_or_else(PoisonError::into_inner) = None;
            }
        }
    }

    fn report(&self, state: ContextState) {
        let Some(sink) = &self.sink else { return };
        {
            let mut last = self.last_reported.lock().unwrap_or_else(PoisonError::into_inner);
            if *last == Some(state) {
                return;
            }
            *last = Some(state);
        }
        sink.context_became_active(self.context, &state);
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn world(&self) -> WorldKind {
        self.world
    }

    pub fn is_faking(&self) -> bool {
        self.realm.is_faking()
    }

    /// How many times the state has been (re)evaluated.
    pub fn evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }

    /// Current instant as page code in this world sees it.
    pub fn now(&self) -> Timestamp {
        self.realm.now()
    }

    pub fn date(&self) -> DateConstructor {
        DateConstructor::new(Arc::clone(&self.realm))
    }

    pub fn date_time_format(&self, options: FormatOptions) -> Result<DateTimeFormat, EngineError> {
        DateTimeFormat::new(Arc::clone(&self.realm), options)
    }
}

impl StorageObserver for ClockEngine {
    fn on_key_changed(&self, key: &str) {
        if is_state_key(key) {
            self.evaluate();
        }
    }
}
