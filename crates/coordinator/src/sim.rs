//! In-memory browser used by tests and as the reference [`TabHost`].
//!
//! Each tab owns a list of frames; each frame is a [`BrowsingContext`] with its
//! own storage scope. Navigation and reload throw the frames away and build new
//! ones, so seeded state only survives if the coordinator seeds again.
//! Lifecycle events and engine notices queue up until drained.

use async_trait::async_trait;
use clock_engine::{ActivationSink, BrowsingContext, ClockEngine, WorldKind};
use context_cache::{seed_state, ContextStorage};
use fauxtime_core::ids::{ContextId, FrameId, TabId};
use fauxtime_core::protocol::{Envelope, Request};
use fauxtime_core::{Clock, ContextState, Timestamp};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

use crate::host::{HostError, Injection, RunAt, TabEvent, TabHost, TabInfo};
use crate::Coordinator;

/// One call to [`TabHost::inject`] as the browser saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionRecord {
    pub tab: TabId,
    pub world: WorldKind,
    pub run_at: RunAt,
    pub frames: usize,
    pub seed: Option<ContextState>,
}

#[derive(Default)]
struct Outbox {
    messages: Mutex<VecDeque<Envelope>>,
}

impl ActivationSink for Outbox {
    fn context_became_active(&self, context: ContextId, state: &ContextState) {
        let request = Request::ContextBecameActive {
            fake_instant: state.fake_instant,
            tick_anchor: state.tick_anchor,
            clock_stopped: state.clock_stopped,
        };
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Envelope::new(Some(context.tab), request));
    }
}

struct SimTab {
    url: String,
    frame_count: u32,
    frames: Vec<Arc<BrowsingContext>>,
    loads: u32,
    reloads: u32,
    block_storage: bool,
    fail_injection: bool,
}

pub struct SimulatedBrowser {
    clock: Arc<dyn Clock>,
    next_tab: AtomicU32,
    tabs: Mutex<BTreeMap<TabId, SimTab>>,
    events: Mutex<VecDeque<TabEvent>>,
    outbox: Arc<Outbox>,
    injections: Mutex<Vec<InjectionRecord>>,
}

impl SimulatedBrowser {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            next_tab: AtomicU32::new(1),
            tabs: Mutex::new(BTreeMap::new()),
            events: Mutex::new(VecDeque::new()),
            outbox: Arc::new(Outbox::default()),
            injections: Mutex::new(Vec::new()),
        }
    }

    fn tabs(&self) -> std::sync::MutexGuard<'_, BTreeMap<TabId, SimTab>> {
        self.tabs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push_event(&self, event: TabEvent) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push_back(event);
    }

    fn build_frames(&self, tab: TabId, count: u32, blocked: bool) -> Vec<Arc<BrowsingContext>> {
        let sink: Arc<dyn ActivationSink> = self.outbox.clone();
        (0..count)
            .map(|i| {
                let storage =
                    Arc::new(if blocked { ContextStorage::blocked() } else { ContextStorage::new() });
                let id = ContextId::new(tab, FrameId(i));
                Arc::new(
                    BrowsingContext::with_storage(id, storage, Arc::clone(&self.clock))
                        .with_activation_sink(Arc::clone(&sink)),
                )
            })
            .collect()
    }

    pub fn open_tab(&self, url: &str) -> TabId {
        self.open_tab_with_frames(url, 1)
    }

    /// Open a tab whose document has `frames` frames (top frame included).
    pub fn open_tab_with_frames(&self, url: &str, frames: u32) -> TabId {
        let tab = TabId(self.next_tab.fetch_add(1, Ordering::Relaxed));
        let frame_count = frames.max(1);
        let built = self.build_frames(tab, frame_count, false);
        self.tabs().insert(
            tab,
            SimTab {
                url: url.to_string(),
                frame_count,
                frames: built,
                loads: 1,
                reloads: 0,
                block_storage: false,
                fail_injection: false,
            },
        );
        self.push_event(TabEvent::Created(tab));
        self.push_event(TabEvent::NavigationStarted(tab));
        tab
    }

    /// Load `url` in `tab`, replacing every frame.
    pub fn navigate(&self, tab: TabId, url: &str) -> Result<(), HostError> {
        self.reload_frames(tab, Some(url))?;
        self.push_event(TabEvent::NavigationStarted(tab));
        Ok(())
    }

    fn reload_frames(&self, tab: TabId, url: Option<&str>) -> Result<(), HostError> {
        let (count, blocked) = {
            let tabs = self.tabs();
            let t = tabs.get(&tab).ok_or(HostError::TabGone(tab))?;
            (t.frame_count, t.block_storage)
        };
        let frames = self.build_frames(tab, count, blocked);
        let mut tabs = self.tabs();
        let t = tabs.get_mut(&tab).ok_or(HostError::TabGone(tab))?;
        if let Some(url) = url {
            t.url = url.to_string();
        }
        t.frames = frames;
        t.loads += 1;
        Ok(())
    }

    pub fn close_tab(&self, tab: TabId) {
        if self.tabs().remove(&tab).is_some() {
            self.push_event(TabEvent::Closed(tab));
        }
    }

    /// Close `tab` without telling anyone, as if it vanished mid-operation.
    pub fn vanish_tab(&self, tab: TabId) {
        self.tabs().remove(&tab);
    }

    pub fn activate(&self, tab: TabId) {
        self.push_event(TabEvent::Activated(tab));
    }

    /// Block context storage in `tab`, now and for future loads.
    pub fn block_storage(&self, tab: TabId, blocked: bool) {
        if let Some(t) = self.tabs().get_mut(&tab) {
            t.block_storage = blocked;
            for f in &t.frames {
                f.storage().set_blocked(blocked);
            }
        }
    }

    pub fn fail_injections(&self, tab: TabId, fail: bool) {
        if let Some(t) = self.tabs().get_mut(&tab) {
            t.fail_injection = fail;
        }
    }

    pub fn drain_events(&self) -> Vec<TabEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).drain(..).collect()
    }

    /// Notices engines sent toward the privileged process.
    pub fn drain_messages(&self) -> Vec<Envelope> {
        self.outbox.messages.lock().unwrap_or_else(PoisonError::into_inner).drain(..).collect()
    }

    /// Deliver queued events and notices to `coordinator` until both queues stay empty.
    pub async fn settle(&self, coordinator: &Coordinator) -> usize {
        let mut delivered = 0;
        loop {
            let events = self.drain_events();
            let messages = self.drain_messages();
            if events.is_empty() && messages.is_empty() {
                return delivered;
            }
            delivered += events.len() + messages.len();
            for e in events {
                coordinator.handle_event(e).await;
            }
            for m in messages {
                coordinator.handle(m).await;
            }
        }
    }

    pub fn frame(&self, tab: TabId, frame: FrameId) -> Option<Arc<BrowsingContext>> {
        self.tabs().get(&tab).and_then(|t| t.frames.get(frame.0 as usize).cloned())
    }

    /// What a page script in the top frame reads from the zero-argument clock.
    pub fn page_now(&self, tab: TabId) -> Option<Timestamp> {
        self.frame_now(tab, FrameId::TOP)
    }

    pub fn frame_now(&self, tab: TabId, frame: FrameId) -> Option<Timestamp> {
        self.frame(tab, frame).map(|ctx| Timestamp::from_millis(ctx.page().date().now()))
    }

    pub fn url(&self, tab: TabId) -> Option<String> {
        self.tabs().get(&tab).map(|t| t.url.clone())
    }

    pub fn loads(&self, tab: TabId) -> u32 {
        self.tabs().get(&tab).map_or(0, |t| t.loads)
    }

    pub fn reloads(&self, tab: TabId) -> u32 {
        self.tabs().get(&tab).map_or(0, |t| t.reloads)
    }

    pub fn injections(&self) -> Vec<InjectionRecord> {
        self.injections.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn tab_ids(&self) -> Vec<TabId> {
        self.tabs().keys().copied().collect()
    }
}

#[async_trait]
impl TabHost for SimulatedBrowser {
    async fn list_tabs(&self) -> Result<Vec<TabInfo>, HostError> {
        Ok(self.tabs().iter().map(|(id, t)| TabInfo { id: *id, url: t.url.clone() }).collect())
    }

    async fn tab(&self, tab: TabId) -> Result<TabInfo, HostError> {
        self.tabs().get(&tab).map(|t| TabInfo { id: tab, url: t.url.clone() }).ok_or(HostError::TabGone(tab))
    }

    async fn reload(&self, tab: TabId) -> Result<(), HostError> {
        self.reload_frames(tab, None)?;
        if let Some(t) = self.tabs().get_mut(&tab) {
            t.reloads += 1;
        }
        self.push_event(TabEvent::NavigationStarted(tab));
        Ok(())
    }

    async fn inject(&self, tab: TabId, injection: &Injection) -> Result<usize, HostError> {
        let frames = {
            let tabs = self.tabs();
            let t = tabs.get(&tab).ok_or(HostError::TabGone(tab))?;
            if t.fail_injection {
                return Err(HostError::InjectionFailed { tab, reason: "frame refused script".into() });
            }
            if injection.all_frames {
                t.frames.clone()
            } else {
                t.frames.iter().take(1).cloned().collect()
            }
        };
        // Locks are released: seeding fires relay notifications into engines.
        let mut seeded = 0;
        for ctx in &frames {
            if let Err(e) = seed_state(ctx.storage(), injection.seed.as_ref()) {
                warn!(context = %ctx.id(), error = %e, "context unreachable; frame abandoned");
                continue;
            }
            ClockEngine::install(ctx, injection.world);
            seeded += 1;
        }
        self.injections.lock().unwrap_or_else(PoisonError::into_inner).push(InjectionRecord {
            tab,
            world: injection.world,
            run_at: injection.run_at,
            frames: seeded,
            seed: injection.seed,
        });
        if seeded == 0 && !frames.is_empty() {
            return Err(HostError::InjectionFailed { tab, reason: "no frame accepted the seed".into() });
        }
        debug!(tab = %tab, frames = seeded, "injected");
        Ok(seeded)
    }
}
