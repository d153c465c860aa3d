//! Context state cache: the transient, per-browsing-context mirror of the fake-time
//! parameters, and the relay that tells same-context listeners when it changes.
//!
//! A [`ContextStorage`] lives exactly as long as its browsing context. Hosts create
//! a fresh one on every navigation, which is what "cleared on navigation unless
//! re-seeded" means in practice.

#![deny(unsafe_code)]

use thiserror::Error;

pub mod relay;
pub mod state;
pub mod storage;

pub use relay::{ChangeRelay, StorageObserver, Subscription};
pub use state::{is_state_key, read_state, seed_state, write_local_override};
pub use storage::ContextStorage;

/// Errors from context-local storage.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("context storage is blocked")]
    Blocked,
    #[error("malformed value for {key}: {value:?}")]
    Malformed { key: &'static str, value: String },
}
