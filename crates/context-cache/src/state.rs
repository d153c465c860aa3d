//! Key layout of the [`ContextState`] mirror inside a context's storage.
//!
//! Each field is its own key so a page-local override can replace any one of them;
//! the last writer of a key wins, whether that was the coordinator or the page.

use fauxtime_core::{ContextState, Timestamp};

use crate::storage::ContextStorage;
use crate::CacheError;

/// Prefix shared by every key this crate owns.
pub const KEY_PREFIX: &str = "fauxtime.";
/// Fake instant (RFC 3339 text).
pub const FAKE_INSTANT: &str = "fauxtime.fakeInstant";
/// Tick anchor (RFC 3339 text).
pub const TICK_ANCHOR: &str = "fauxtime.tickAnchor";
/// `"true"` / `"false"`.
pub const CLOCK_STOPPED: &str = "fauxtime.clockStopped";

/// Whether a changed key can affect the effective context state.
pub fn is_state_key(key: &str) -> bool {
    key.starts_with(KEY_PREFIX)
}

fn parse_instant(key: &'static str, raw: Option<String>) -> Result<Option<Timestamp>, CacheError> {
    raw.map(|value| Timestamp::parse(&value).map_err(|_| CacheError::Malformed { key, value }))
        .transpose()
}

/// Read the effective state; `Ok(None)` when the context was never seeded or was
/// seeded "disabled".
pub fn read_state(storage: &ContextStorage) -> Result<Option<ContextState>, CacheError> {
    let Some(fake) = parse_instant(FAKE_INSTANT, storage.get(FAKE_INSTANT)?)? else {
        return Ok(None);
    };
    let tick_anchor = parse_instant(TICK_ANCHOR, storage.get(TICK_ANCHOR)?)?;
    let clock_stopped = match storage.get(CLOCK_STOPPED)? {
        None => tick_anchor.is_none(),
        Some(v) if v == "true" => true,
        Some(v) if v == "false" => false,
        Some(value) => return Err(CacheError::Malformed { key: CLOCK_STOPPED, value }),
    };
    Ok(Some(ContextState { fake_instant: Some(fake), tick_anchor, clock_stopped }))
}

/// Seed the full state in one batch; `None` (or an inactive state) seeds "disabled".
pub fn seed_state(storage: &ContextStorage, state: Option<&ContextState>) -> Result<(), CacheError> {
    let writes = match state.filter(|s| s.is_active()) {
        Some(s) => vec![
            (FAKE_INSTANT.to_string(), s.fake_instant.map(Timestamp::to_rfc3339)),
            (TICK_ANCHOR.to_string(), s.tick_anchor.map(Timestamp::to_rfc3339)),
            (CLOCK_STOPPED.to_string(), Some(s.clock_stopped.to_string())),
        ],
        None => [FAKE_INSTANT, TICK_ANCHOR, CLOCK_STOPPED]
            .into_iter()
            .map(|k| (k.to_string(), None))
            .collect(),
    };
    storage.apply(writes)
}

/// Page-authored override of just the fake instant; takes effect for this context
/// only and is replaced by the next seed.
pub fn write_local_override(storage: &ContextStorage, instant: Timestamp) -> Result<(), CacheError> {
    storage.set(FAKE_INSTANT, instant.to_rfc3339())
}
