//! Clock engine: makes every "current time" read inside a browsing context resolve
//! through one [`NowProvider`], swapped atomically between the genuine clock and a
//! virtual one derived from the context's [`ContextState`](fauxtime_core::ContextState).
//!
//! Page code only ever sees the facades in [`date`] and [`format`]. Values built
//! while faking and values built from the genuine clock are the same type, so
//! downstream code cannot tell them apart; only the implicit "now" path differs.

#![deny(unsafe_code)]

use thiserror::Error;

pub mod context;
pub mod date;
pub mod engine;
pub mod format;
pub mod provider;

pub use context::{ActivationSink, BrowsingContext, World, WorldKind};
pub use date::{DateArgs, DateConstructor, DateFields, DateValue};
pub use engine::ClockEngine;
pub use format::{DateTimeFormat, FormatOptions};
pub use provider::{NowProvider, Realm, RealNow, VirtualNow};

/// Errors surfaced to page code by the facades.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("invalid date: {0}")]
    InvalidDate(String),
    #[error("invalid format pattern: {0:?}")]
    InvalidPattern(String),
}
