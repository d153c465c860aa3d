//! fauxtime core primitives and shared types.

#![deny(unsafe_code)]

use thiserror::Error;

/// Version of the fauxtime core library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod clock;
pub mod config;
pub mod instant;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{virtual_instant, ContextState, GlobalConfig, PartialGlobalConfig};
pub use instant::Timestamp;

/// Errors raised by core validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid date/time: {input:?}")]
    InvalidTimestamp { input: String },
    #[error("config invariant violated: {0}")]
    Invariant(&'static str),
}

pub mod ids {
    //! Identifiers: browser tabs, frames, and message ids.

    use serde::{Deserialize, Serialize};
    use std::fmt;
    use std::sync::atomic::{AtomicU64, Ordering};
    use uuid::Uuid;

    static NEXT_ID: AtomicU64 = AtomicU64::new(1);

    /// Generate a new monotonic identifier (starts at 1).
    pub fn next_monotonic_id() -> u64 {
        NEXT_ID.fetch_add(1, Ordering::Relaxed)
    }

    /// Opaque correlation id for bridge requests (UUID v4 string).
    pub fn new_request_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Browser tab identifier, stable for the life of the tab.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    pub struct TabId(pub u32);

    impl fmt::Display for TabId {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "tab-{}", self.0)
        }
    }

    /// Frame identifier within a tab; `0` is the top-level frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    pub struct FrameId(pub u32);

    impl FrameId {
        /// The top-level document of a tab.
        pub const TOP: Self = Self(0);
    }

    /// One browsing context: a frame of a tab.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    pub struct ContextId {
        pub tab: TabId,
        pub frame: FrameId,
    }

    impl ContextId {
        pub const fn new(tab: TabId, frame: FrameId) -> Self {
            Self { tab, frame }
        }
    }

    impl fmt::Display for ContextId {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}/frame-{}", self.tab, self.frame.0)
        }
    }

}

pub mod protocol {
    //! Inter-context request/response messages relayed by the privileged process.

    use super::ids::{next_monotonic_id, TabId};
    use super::{GlobalConfig, Timestamp};
    use serde::{Deserialize, Serialize};

    /// A request addressed to the privileged process.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "type")]
    pub enum Request {
        /// Read-only snapshot of the global configuration.
        GetGlobalConfig,
        /// Set the fake instant and/or run state. `fake_instant` is raw user text
        /// and is validated before anything is mutated.
        #[serde(rename_all = "camelCase")]
        SetGlobalConfig {
            #[serde(default)]
            fake_instant: Option<String>,
            #[serde(default)]
            clock_stopped: Option<bool>,
        },
        /// Reset the global configuration to defaults (faking disabled).
        ClearGlobalConfig,
        /// Re-run propagation on every open tab.
        ReapplyGlobalConfig,
        /// Fire-and-forget status notice from an installed clock engine.
        #[serde(rename_all = "camelCase")]
        ContextBecameActive {
            #[serde(default)]
            fake_instant: Option<Timestamp>,
            #[serde(default)]
            tick_anchor: Option<Timestamp>,
            clock_stopped: bool,
        },
    }

    /// Reply from the privileged process.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "type")]
    pub enum Response {
        /// Snapshot answer to [`Request::GetGlobalConfig`].
        GlobalConfig { config: GlobalConfig },
        /// Outcome of a mutating request.
        Outcome {
            success: bool,
            #[serde(default, skip_serializing_if = "Option::is_none")]
            error: Option<String>,
        },
        /// Acknowledgement of a fire-and-forget notice.
        Ack,
    }

    impl Response {
        /// Successful outcome.
        pub fn ok() -> Self {
            Self::Outcome { success: true, error: None }
        }

        /// Failed outcome carrying a descriptive message.
        pub fn failed(error: impl Into<String>) -> Self {
            Self::Outcome { success: false, error: Some(error.into()) }
        }

        /// Whether this response reports success (snapshots and acks count as success).
        pub fn is_success(&self) -> bool {
            match self {
                Self::Outcome { success, .. } => *success,
                Self::GlobalConfig { .. } | Self::Ack => true,
            }
        }
    }

    /// Request plus routing metadata.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Envelope {
        /// Unique message id.
        pub id: String,
        /// Tab the request originated from, if any (popup requests have none).
        pub sender: Option<TabId>,
        /// The request body.
        pub request: Request,
    }

    impl Envelope {
        /// Wrap a request with a fresh id.
        pub fn new(sender: Option<TabId>, request: Request) -> Self {
            Self { id: format!("msg-{}", next_monotonic_id()), sender, request }
        }
    }

}
