use fauxtime_core::{GlobalConfig, ManualClock, PartialGlobalConfig, Timestamp};
use state_store::{Backend, JsonFileBackend, StateStore, StoreError, StoredRecord};
use std::sync::Arc;

fn at(s: &str) -> Timestamp {
    Timestamp::parse(s).unwrap()
}

#[test]
fn record_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(JsonFileBackend::in_dir(dir.path()).unwrap());
    store
        .write(&PartialGlobalConfig::at(at("2023-12-25T10:30:00.000Z")).stopped(true))
        .unwrap();

    let reopened = StateStore::new(JsonFileBackend::in_dir(dir.path()).unwrap());
    let cfg = reopened.read();
    assert!(cfg.enabled);
    assert!(cfg.clock_stopped);
    assert_eq!(cfg.tick_anchor, None);
    assert_eq!(cfg.fake_instant.unwrap().to_rfc3339(), "2023-12-25T10:30:00.000Z");
    assert_eq!(reopened.version().unwrap(), 1);
}

#[test]
fn persisted_layout_is_stable_json() {
    let dir = tempfile::tempdir().unwrap();
    let backend = JsonFileBackend::in_dir(dir.path()).unwrap();
    let path = backend.path().to_path_buf();
    let clock = Arc::new(ManualClock::new(Timestamp::from_millis(0)));
    let store = StateStore::with_clock(backend, clock);
    store.write(&PartialGlobalConfig::at(Timestamp::from_millis(1_000))).unwrap();

    let v: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(v["version"], 1);
    assert_eq!(v["config"]["fakeInstant"], "1970-01-01T00:00:01.000Z");
    assert_eq!(v["config"]["clockStopped"], true);
    assert!(v["config"]["tickAnchor"].is_null());
}

#[test]
fn corrupt_record_reads_as_default_and_can_be_cleared() {
    let dir = tempfile::tempdir().unwrap();
    let backend = JsonFileBackend::in_dir(dir.path()).unwrap();
    std::fs::write(backend.path(), "{ not json").unwrap();
    let store = StateStore::new(backend);

    assert!(matches!(store.try_read(), Err(StoreError::Serde(_))));
    assert_eq!(store.read(), GlobalConfig::default());
    assert!(store.write(&PartialGlobalConfig::at(Timestamp::from_millis(1))).is_err());

    store.clear().unwrap();
    assert!(store.try_read().is_ok());
    assert!(store.write(&PartialGlobalConfig::at(Timestamp::from_millis(1))).unwrap().is_some());
}

struct BrokenBackend;

impl Backend for BrokenBackend {
    fn load(&self) -> Result<Option<StoredRecord>, StoreError> {
        Err(StoreError::Unavailable("disk gone".into()))
    }
    fn save(&self, _: &StoredRecord) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("disk gone".into()))
    }
}

#[test]
fn unavailable_backend_degrades_reads_and_fails_writes() {
    let store = StateStore::new(BrokenBackend);
    let mut rx = store.subscribe();
    assert_eq!(store.read(), GlobalConfig::default());
    assert!(store.write(&PartialGlobalConfig::at(Timestamp::from_millis(1))).is_err());
    assert!(store.clear().is_err());
    assert!(rx.try_recv().is_err());
}

#[test]
fn concurrent_writers_publish_each_change_once_in_order() {
    let store = Arc::new(StateStore::in_memory());
    let mut rx = store.subscribe();
    let handles: Vec<_> = (1..=8)
        .map(|i| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                store.write(&PartialGlobalConfig::at(Timestamp::from_millis(i * 1_000))).unwrap()
            })
        })
        .collect();
    let committed = handles.into_iter().filter_map(|h| h.join().unwrap()).count();

    let mut versions = Vec::new();
    while let Ok(change) = rx.try_recv() {
        change.new.check_invariants().unwrap();
        versions.push(change.version);
    }
    assert_eq!(versions.len(), committed);
    assert!(versions.windows(2).all(|w| w[1] == w[0] + 1));
    assert_eq!(store.version().unwrap(), *versions.last().unwrap());
}

#[tokio::test]
async fn subscribers_see_old_and_new_values() {
    let store = StateStore::in_memory();
    let mut rx = store.subscribe();
    store.write(&PartialGlobalConfig::at(Timestamp::from_millis(7))).unwrap();
    let change = rx.recv().await.unwrap();
    assert_eq!(change.old, GlobalConfig::default());
    assert_eq!(change.new.fake_instant, Some(Timestamp::from_millis(7)));
}
