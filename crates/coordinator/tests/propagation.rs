use coordinator::sim::SimulatedBrowser;
use coordinator::{Coordinator, TabPhase, Trigger, UrlPolicy};
use fauxtime_core::ids::{FrameId, TabId};
use fauxtime_core::protocol::{Envelope, Request, Response};
use fauxtime_core::{ContextState, GlobalConfig, ManualClock, PartialGlobalConfig, Timestamp};
use state_store::{ConfigChange, MemoryBackend, StateStore};
use std::sync::Arc;
use tokio::sync::broadcast;

const REAL_START: i64 = 1_700_000_000_000;

struct Rig {
    clock: Arc<ManualClock>,
    browser: Arc<SimulatedBrowser>,
    coordinator: Coordinator,
    feed: broadcast::Receiver<ConfigChange>,
}

impl Rig {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(REAL_START)));
        let store = Arc::new(StateStore::with_clock(MemoryBackend::new(), clock.clone()));
        let browser = Arc::new(SimulatedBrowser::new(clock.clone()));
        let feed = store.subscribe();
        let coordinator = Coordinator::new(store, browser.clone(), UrlPolicy::default());
        Self { clock, browser, coordinator, feed }
    }

    async fn send(&self, request: Request) -> Response {
        self.coordinator.handle(Envelope::new(None, request)).await
    }

    async fn set(&self, fake: &str, stopped: Option<bool>) -> Response {
        self.send(Request::SetGlobalConfig { fake_instant: Some(fake.into()), clock_stopped: stopped }).await
    }

    async fn get(&self) -> GlobalConfig {
        match self.send(Request::GetGlobalConfig).await {
            Response::GlobalConfig { config } => config,
            other => panic!("unexpected response {other:?}"),
        }
    }

    /// Deliver store changes and browser events until nothing is pending.
    async fn pump(&mut self) {
        loop {
            let mut progressed = false;
            while let Ok(change) = self.feed.try_recv() {
                self.coordinator.on_config_changed(&change).await;
                progressed = true;
            }
            if self.browser.settle(&self.coordinator).await > 0 {
                progressed = true;
            }
            if !progressed {
                return;
            }
        }
    }

    fn real_now(&self) -> Timestamp {
        use fauxtime_core::Clock;
        self.clock.now()
    }
}

fn christmas() -> Timestamp {
    Timestamp::parse("2023-12-25T10:30:00.000Z").unwrap()
}

#[tokio::test]
async fn frozen_christmas_reaches_an_open_tab() {
    let mut rig = Rig::new();
    let tab = rig.browser.open_tab("https://example.com/");
    rig.pump().await;
    assert_eq!(rig.coordinator.registry().phase(tab), TabPhase::Seeded);
    assert_eq!(rig.browser.page_now(tab), Some(rig.real_now()));

    assert!(rig.set("2023-12-25T10:30:00.000Z", Some(true)).await.is_success());
    let cfg = rig.get().await;
    assert_eq!(cfg.fake_instant, Some(christmas()));
    assert!(cfg.clock_stopped);
    assert_eq!(cfg.tick_anchor, None);

    rig.pump().await;
    assert_eq!(rig.browser.reloads(tab), 1);
    assert_eq!(rig.coordinator.registry().phase(tab), TabPhase::Seeded);
    assert_eq!(rig.browser.page_now(tab), Some(christmas()));
    rig.clock.advance_ms(1_000);
    assert_eq!(rig.browser.page_now(tab), Some(christmas()));

    let status = rig.coordinator.registry().status(tab).expect("engine reported in");
    assert_eq!(status.state, ContextState::frozen(christmas()));
}

#[tokio::test]
async fn running_clock_ticks_in_a_seeded_tab() {
    let mut rig = Rig::new();
    let tab = rig.browser.open_tab("https://example.com/");
    assert!(rig.set("2023-12-25T10:30:00.000Z", Some(false)).await.is_success());
    rig.pump().await;

    let first = rig.browser.page_now(tab).unwrap();
    rig.clock.advance_ms(2_000);
    let second = rig.browser.page_now(tab).unwrap();
    let diff = second.millis_since(first);
    assert!((2_000..2_100).contains(&diff), "diff {diff}");
    assert_eq!(first, christmas());
}

#[tokio::test]
async fn malformed_instant_changes_nothing() {
    let mut rig = Rig::new();
    assert!(rig.set("2023-12-25T10:30:00.000Z", Some(true)).await.is_success());
    rig.pump().await;
    let before = rig.get().await;
    let version = rig.coordinator.store().version().unwrap();

    match rig.set("not-a-date", None).await {
        Response::Outcome { success, error } => {
            assert!(!success);
            assert!(error.unwrap().contains("not-a-date"));
        }
        other => panic!("unexpected response {other:?}"),
    }
    assert_eq!(rig.get().await, before);
    assert_eq!(rig.coordinator.store().version().unwrap(), version);
    assert!(rig.feed.try_recv().is_err());
}

#[tokio::test]
async fn bare_year_means_new_year_midnight() {
    let rig = Rig::new();
    assert!(rig.set("2024", Some(true)).await.is_success());
    let cfg = rig.get().await;
    assert_eq!(cfg.fake_instant.map(Timestamp::to_rfc3339).as_deref(), Some("2024-01-01T00:00:00.000Z"));
}

#[tokio::test]
async fn rapid_sets_reload_a_tab_at_most_once() {
    let mut rig = Rig::new();
    let tab = rig.browser.open_tab("https://example.com/");
    rig.pump().await;

    for fake in ["2023-01-01", "2023-06-01T12:00", "2023-12-25T10:30:00.000Z"] {
        assert!(rig.set(fake, Some(true)).await.is_success());
    }
    rig.pump().await;
    assert_eq!(rig.browser.reloads(tab), 1);
    assert_eq!(rig.browser.page_now(tab), Some(christmas()));
    assert_eq!(rig.coordinator.metrics().snapshot().reloads, 1);
}

#[tokio::test]
async fn concurrent_evaluations_claim_one_reload() {
    let rig = Rig::new();
    rig.coordinator.store().write(&PartialGlobalConfig::at(christmas())).unwrap();
    let tab = rig.browser.open_tab("https://example.com/");
    rig.browser.drain_events();

    let (a, b) = tokio::join!(
        rig.coordinator.evaluate_tab(tab, Trigger::Navigation),
        rig.coordinator.evaluate_tab(tab, Trigger::Activation)
    );
    let phases = [a, b];
    assert_eq!(phases.iter().filter(|p| **p == TabPhase::AwaitingReload).count(), 1);
    assert_eq!(rig.browser.reloads(tab), 1);
}

#[tokio::test]
async fn disabling_restores_real_time_without_reload() {
    let mut rig = Rig::new();
    let tab = rig.browser.open_tab("https://example.com/");
    assert!(rig.set("2023-12-25T10:30:00.000Z", Some(true)).await.is_success());
    rig.pump().await;
    assert_eq!(rig.browser.page_now(tab), Some(christmas()));
    let loads = rig.browser.loads(tab);

    assert!(rig.send(Request::ClearGlobalConfig).await.is_success());
    rig.pump().await;
    assert_eq!(rig.browser.page_now(tab), Some(rig.real_now()));
    assert_eq!(rig.browser.loads(tab), loads);
    assert!(!rig.coordinator.registry().was_reloaded(tab));
    assert!(!rig.get().await.enabled);

    // Re-enabling earns a fresh one-time reload.
    assert!(rig.set("2024-02-29", Some(true)).await.is_success());
    rig.pump().await;
    assert_eq!(rig.browser.reloads(tab), 2);
}

#[tokio::test]
async fn restricted_tabs_are_skipped() {
    let mut rig = Rig::new();
    let settings = rig.browser.open_tab("chrome://settings");
    let store_page = rig.browser.open_tab("https://chromewebstore.google.com/detail/x");
    let page = rig.browser.open_tab("https://example.com/");
    assert!(rig.set("2023-12-25T10:30:00.000Z", Some(true)).await.is_success());
    rig.pump().await;

    for tab in [settings, store_page] {
        assert_eq!(rig.coordinator.registry().phase(tab), TabPhase::Skipped);
        assert_eq!(rig.browser.reloads(tab), 0);
        assert_eq!(rig.browser.page_now(tab), Some(rig.real_now()));
    }
    assert_eq!(rig.browser.page_now(page), Some(christmas()));
    assert!(rig.browser.injections().iter().all(|i| i.tab == page));
    assert!(rig.coordinator.metrics().snapshot().skips >= 2);
}

#[tokio::test]
async fn failures_stay_with_their_tab() {
    let mut rig = Rig::new();
    let broken = rig.browser.open_tab("https://broken.example/");
    let blocked = rig.browser.open_tab("https://sandboxed.example/");
    let fine = rig.browser.open_tab("https://example.com/");
    rig.pump().await;
    rig.browser.fail_injections(broken, true);
    rig.browser.block_storage(blocked, true);

    assert!(rig.set("2023-12-25T10:30:00.000Z", Some(true)).await.is_success());
    rig.pump().await;

    assert_eq!(rig.coordinator.registry().phase(broken), TabPhase::Skipped);
    assert_eq!(rig.coordinator.registry().phase(blocked), TabPhase::Skipped);
    assert_eq!(rig.coordinator.registry().phase(fine), TabPhase::Seeded);
    assert_eq!(rig.browser.page_now(fine), Some(christmas()));
    assert_eq!(rig.browser.page_now(blocked), Some(rig.real_now()));
    assert_eq!(rig.coordinator.metrics().snapshot().failures, 2);
    assert!(!rig.coordinator.registry().is_active(broken));
}

#[tokio::test]
async fn vanished_tab_is_forgotten() {
    let rig = Rig::new();
    let tab = rig.browser.open_tab("https://example.com/");
    rig.browser.vanish_tab(tab);
    assert_eq!(rig.coordinator.evaluate_tab(tab, Trigger::Activation).await, TabPhase::Unknown);
    assert!(!rig.coordinator.registry().knows(tab));
    assert_eq!(rig.coordinator.metrics().snapshot().failures, 0);
    assert_eq!(rig.coordinator.evaluate_tab(TabId(999), Trigger::Reapply).await, TabPhase::Unknown);
}

#[tokio::test]
async fn closing_a_tab_purges_it() {
    let mut rig = Rig::new();
    let tab = rig.browser.open_tab("https://example.com/");
    assert!(rig.set("2023-12-25T10:30:00.000Z", Some(true)).await.is_success());
    rig.pump().await;
    assert!(rig.coordinator.registry().is_active(tab));
    assert!(rig.coordinator.registry().was_reloaded(tab));

    rig.browser.close_tab(tab);
    rig.pump().await;
    assert!(!rig.coordinator.registry().knows(tab));
}

#[tokio::test]
async fn navigation_reseeds_every_frame_without_reload() {
    let mut rig = Rig::new();
    let tab = rig.browser.open_tab_with_frames("https://example.com/", 3);
    assert!(rig.set("2023-12-25T10:30:00.000Z", Some(true)).await.is_success());
    rig.pump().await;
    assert_eq!(rig.browser.reloads(tab), 1);

    rig.browser.navigate(tab, "https://example.com/next").unwrap();
    rig.pump().await;
    assert_eq!(rig.browser.reloads(tab), 1);
    for frame in 0..3 {
        assert_eq!(rig.browser.frame_now(tab, FrameId(frame)), Some(christmas()));
    }
    let last = rig.browser.injections().pop().unwrap();
    assert_eq!(last.frames, 3);
    assert_eq!(last.world, clock_engine::WorldKind::Main);
    assert_eq!(last.run_at, coordinator::RunAt::DocumentStart);
}

#[tokio::test]
async fn stopping_freezes_where_the_clock_was() {
    let mut rig = Rig::new();
    let tab = rig.browser.open_tab("https://example.com/");
    assert!(rig.set("2023-12-25T10:30:00.000Z", Some(false)).await.is_success());
    rig.pump().await;
    rig.clock.advance_ms(5_000);

    let stop = Request::SetGlobalConfig { fake_instant: None, clock_stopped: Some(true) };
    assert!(rig.send(stop).await.is_success());
    rig.pump().await;
    let frozen = christmas().saturating_add_millis(5_000);
    assert_eq!(rig.browser.page_now(tab), Some(frozen));
    rig.clock.advance_ms(3_000);
    assert_eq!(rig.browser.page_now(tab), Some(frozen));
    assert_eq!(rig.get().await.tick_anchor, None);
}

#[tokio::test]
async fn reapply_request_reseeds_open_tabs() {
    let mut rig = Rig::new();
    let tab = rig.browser.open_tab("https://example.com/");
    assert!(rig.set("2023-12-25T10:30:00.000Z", Some(true)).await.is_success());
    rig.pump().await;
    let injected = rig.browser.injections().len();

    assert!(rig.send(Request::ReapplyGlobalConfig).await.is_success());
    assert_eq!(rig.browser.injections().len(), injected + 1);
    assert_eq!(rig.browser.reloads(tab), 1);
    assert_eq!(rig.coordinator.registry().active_tabs(), vec![tab]);
}
