//! Page-facing bridge for third-party scripts.
//!
//! A page posts a [`PageMessage`]; the bridge checks it came from the page's
//! own origin, forwards the intent to the coordinator, and answers within a
//! bounded time. No answer in time is reported as [`BridgeError::Unavailable`],
//! never as success.

use fauxtime_core::ids::{new_request_id, TabId};
use fauxtime_core::protocol::{Request, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info_span, warn, Instrument};

use crate::CoordinatorHandle;

/// `source` tag pages put on their messages.
pub const PAGE_SOURCE: &str = "fauxtime-page";
/// `source` tag on bridge replies.
pub const BRIDGE_SOURCE: &str = "fauxtime-bridge";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("message from {sender} rejected: page origin is {page}")]
    CrossOrigin { sender: String, page: String },
    #[error("message is not addressed to the bridge")]
    ForeignSource,
    #[error("extension unavailable: {0}")]
    Unavailable(String),
}

/// What a page may ask for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "intent")]
pub enum BridgeIntent {
    GetGlobalConfig,
    #[serde(rename_all = "camelCase")]
    SetGlobalConfig {
        #[serde(default)]
        fake_instant: Option<String>,
        #[serde(default)]
        clock_stopped: Option<bool>,
    },
}

impl From<BridgeIntent> for Request {
    fn from(intent: BridgeIntent) -> Self {
        match intent {
            BridgeIntent::GetGlobalConfig => Self::GetGlobalConfig,
            BridgeIntent::SetGlobalConfig { fake_instant, clock_stopped } => {
                Self::SetGlobalConfig { fake_instant, clock_stopped }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMessage {
    pub source: String,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub intent: BridgeIntent,
}

impl PageMessage {
    pub fn new(intent: BridgeIntent) -> Self {
        Self { source: PAGE_SOURCE.to_string(), request_id: None, intent }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeReply {
    pub source: String,
    pub request_id: String,
    pub response: Response,
}

/// One bridge per page, bound to the page's origin.
pub struct PageBridge {
    tab: TabId,
    origin: String,
    handle: CoordinatorHandle,
    timeout: Duration,
}

impl PageBridge {
    pub fn new(tab: TabId, page_origin: &str, handle: CoordinatorHandle, timeout: Duration) -> Self {
        Self { tab, origin: normalize_origin(page_origin), handle, timeout }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Validate, forward, and wait for the coordinator's answer.
    pub async fn handle_message(&self, sender_origin: &str, msg: PageMessage) -> Result<BridgeReply, BridgeError> {
        if msg.source != PAGE_SOURCE {
            return Err(BridgeError::ForeignSource);
        }
        let sender = normalize_origin(sender_origin);
        if sender == "null" || sender != self.origin {
            debug!(sender = %sender, page = %self.origin, "cross-origin bridge message dropped");
            return Err(BridgeError::CrossOrigin { sender, page: self.origin.clone() });
        }
        let request_id = msg.request_id.unwrap_or_else(new_request_id);
        let span = info_span!("bridge.forward", tab = %self.tab, request_id = %request_id);
        let response = async {
            match timeout(self.timeout, self.handle.request(Some(self.tab), msg.intent.into())).await {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(e)) => {
                    warn!(error = %e, "coordinator gone");
                    Err(BridgeError::Unavailable(e.to_string()))
                }
                Err(_) => {
                    warn!(timeout_ms = self.timeout.as_millis() as u64, "coordinator did not answer in time");
                    Err(BridgeError::Unavailable(format!(
                        "no answer within {} ms",
                        self.timeout.as_millis()
                    )))
                }
            }
        }
        .instrument(span)
        .await?;
        Ok(BridgeReply { source: BRIDGE_SOURCE.to_string(), request_id, response })
    }
}

fn normalize_origin(origin: &str) -> String {
    origin.trim().trim_end_matches('/').to_ascii_lowercase()
}
