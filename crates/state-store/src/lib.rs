//! Durable store for the global virtual-time configuration.
//!
//! One record, keyed by a fixed identifier, holds the [`GlobalConfig`]. Writes are
//! read-merge-write under a single lock, so a concurrent reader sees either the
//! old or the new value, never a half-merged one. Every logical change is
//! published exactly once on a broadcast feed, in commit order.

#![deny(unsafe_code)]

use fauxtime_core::clock::process_clock;
use fauxtime_core::{Clock, CoreError, GlobalConfig, PartialGlobalConfig, Timestamp};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info_span, warn};

/// Fixed identifier of the persisted record.
pub const RECORD_KEY: &str = "fauxtime.global_config";

const FEED_CAPACITY: usize = 64;

/// Errors emitted by the state store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialize: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("rejected: {0}")]
    Rejected(#[from] CoreError),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// The persisted shape: the config plus a write counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    /// Bumped on every logical change.
    pub version: u64,
    /// Real instant of the last write.
    pub updated_at: Timestamp,
    /// The configuration itself.
    pub config: GlobalConfig,
}

/// A committed change, published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigChange {
    /// Value before the write.
    pub old: GlobalConfig,
    /// Value after the write.
    pub new: GlobalConfig,
    /// Record version after the write.
    pub version: u64,
}

impl ConfigChange {
    /// Whether this change turned faking fully off.
    pub fn is_disable(&self) -> bool {
        !self.new.enabled
    }
}

/// Where the record physically lives.
pub trait Backend: Send + Sync {
    /// Load the record; `Ok(None)` when nothing was ever persisted.
    fn load(&self) -> Result<Option<StoredRecord>, StoreError>;
    /// Replace the record atomically.
    fn save(&self, record: &StoredRecord) -> Result<(), StoreError>;
}

/// In-process backend (tests, ephemeral profiles).
#[derive(Debug, Default)]
pub struct MemoryBackend {
    slot: Mutex<Option<StoredRecord>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for MemoryBackend {
    fn load(&self) -> Result<Option<StoredRecord>, StoreError> {
        Ok(self.slot.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn save(&self, record: &StoredRecord) -> Result<(), StoreError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(record.clone());
        Ok(())
    }
}

/// JSON file backend. Saves go through a temp file + rename, so a crash mid-write
/// leaves the previous record intact.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    /// Use the record file at `path`. Parent directories are created on demand.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    /// Use `<dir>/fauxtime.global_config.json`.
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        Self::open(dir.as_ref().join(format!("{RECORD_KEY}.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Backend for JsonFileBackend {
    fn load(&self) -> Result<Option<StoredRecord>, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(None),
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, record: &StoredRecord) -> Result<(), StoreError> {
        let dir = match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(p) => p.to_path_buf(),
            None => PathBuf::from("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        let line = serde_json::to_string_pretty(record)?;
        tmp.write_all(line.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.flush()?;
        tmp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }
}

/// The state store: atomic merge-writes over a [`Backend`] plus a change feed.
///
/// ```
/// use fauxtime_core::{PartialGlobalConfig, Timestamp};
/// use state_store::{JsonFileBackend, StateStore};
///
/// let dir = tempfile::tempdir().unwrap();
/// let store = StateStore::new(JsonFileBackend::in_dir(dir.path()).unwrap());
/// let at = Timestamp::parse("2023-12-25T10:30:00Z").unwrap();
/// store.write(&PartialGlobalConfig::at(at).stopped(true)).unwrap();
///
/// let reopened = StateStore::new(JsonFileBackend::in_dir(dir.path()).unwrap());
/// assert_eq!(reopened.read().fake_instant, Some(at));
/// ```
pub struct StateStore {
    backend: Box<dyn Backend>,
    clock: Arc<dyn Clock>,
    lock: RwLock<()>,
    changes: broadcast::Sender<ConfigChange>,
}

impl StateStore {
    /// Store over `backend`, stamping anchors with the process clock.
    pub fn new(backend: impl Backend + 'static) -> Self {
        Self::with_clock(backend, process_clock())
    }

    /// Store over `backend` with an explicit real clock.
    pub fn with_clock(backend: impl Backend + 'static, clock: Arc<dyn Clock>) -> Self {
        let (changes, _) = broadcast::channel(FEED_CAPACITY);
        Self { backend: Box::new(backend), clock, lock: RwLock::new(()), changes }
    }

    /// In-memory store, mostly for tests.
    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    /// The real clock this store stamps with.
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Current configuration; the documented default when nothing is persisted
    /// or the backend cannot be read.
    pub fn read(&self) -> GlobalConfig {
        self.try_read().unwrap_or_else(|e| {
            warn!(error = %e, "state store read failed; using defaults");
            GlobalConfig::default()
        })
    }

    /// Current configuration, surfacing backend failures.
    pub fn try_read(&self) -> Result<GlobalConfig, StoreError> {
        let _guard = self.lock.read().unwrap_or_else(PoisonError::into_inner);
        Ok(self.backend.load()?.map(|r| r.config).unwrap_or_default())
    }

    /// Current record version (0 when nothing is persisted).
    pub fn version(&self) -> Result<u64, StoreError> {
        let _guard = self.lock.read().unwrap_or_else(PoisonError::into_inner);
        Ok(self.backend.load()?.map_or(0, |r| r.version))
    }

    /// Merge `patch` onto the current value and persist it.
    ///
    /// Returns the published change, or `None` when the merge changed nothing.
    pub fn write(&self, patch: &PartialGlobalConfig) -> Result<Option<ConfigChange>, StoreError> {
        let _span = info_span!("store.write").entered();
        let _guard = self.lock.write().unwrap_or_else(PoisonError::into_inner);
        let current = self.backend.load()?;
        let (version, old) = current.map_or((0, GlobalConfig::default()), |r| (r.version, r.config));
        let now = self.clock.now();
        let new = old.merge(patch, now)?;
        if new == old {
            debug!("merge produced no change");
            return Ok(None);
        }
        let record = StoredRecord { version: version + 1, updated_at: now, config: new };
        self.backend.save(&record)?;
        Ok(Some(self.publish(old, new, record.version)))
    }

    /// Reset to defaults. An unreadable record counts as defaults but is still
    /// overwritten, so a corrupt store can always be cleared. A store already at
    /// defaults is left untouched.
    pub fn clear(&self) -> Result<Option<ConfigChange>, StoreError> {
        let _span = info_span!("store.clear").entered();
        let _guard = self.lock.write().unwrap_or_else(PoisonError::into_inner);
        let (version, old) = match self.backend.load() {
            Ok(None) => return Ok(None),
            Ok(Some(r)) if r.config == GlobalConfig::default() => return Ok(None),
            Ok(Some(r)) => (r.version, r.config),
            Err(e) => {
                warn!(error = %e, "unreadable record while clearing");
                (0, GlobalConfig::default())
            }
        };
        let record = StoredRecord {
            version: version + 1,
            updated_at: self.clock.now(),
            config: GlobalConfig::default(),
        };
        self.backend.save(&record)?;
        if old == GlobalConfig::default() {
            return Ok(None);
        }
        Ok(Some(self.publish(old, record.config, record.version)))
    }

    /// Subscribe to committed changes.
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChange> {
        self.changes.subscribe()
    }

    // Called with the write lock held so the feed order matches commit order.
    fn publish(&self, old: GlobalConfig, new: GlobalConfig, version: u64) -> ConfigChange {
        let change = ConfigChange { old, new, version };
        debug!(version, enabled = new.enabled, "publishing config change");
        // No subscribers is fine.
        let _ = self.changes.send(change.clone());
        change
    }
}
