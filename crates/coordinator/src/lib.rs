//! Propagation coordinator: keeps every open tab's context state in line with
//! the global virtual-time configuration.
//!
//! The coordinator owns no configuration of its own. Every evaluation re-reads
//! the [`StateStore`], so a change that supersedes an earlier one simply wins.
//! Per-tab failures are logged and contained; nothing here aborts the loop.

#![deny(unsafe_code)]

use fauxtime_core::ids::TabId;
use fauxtime_core::protocol::{Envelope, Request, Response};
use fauxtime_core::{ContextState, PartialGlobalConfig, Timestamp};
use state_store::{ConfigChange, StateStore};
use std::sync::Arc;
use telemetry::PropagationMetrics;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, info_span, warn, Instrument};

pub mod bridge;
pub mod config;
pub mod host;
pub mod registry;
pub mod sim;

pub use bridge::{BridgeError, BridgeIntent, BridgeReply, PageBridge, PageMessage};
pub use config::{ConfigError, CoordinatorConfig, Restriction, UrlPolicy};
pub use host::{HostError, Injection, RunAt, TabEvent, TabHost, TabInfo};
pub use registry::{ContextStatus, TabPhase, TabRegistry};

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("coordinator is no longer running")]
    Closed,
}

/// What caused an evaluation; carried on the `coordinator.evaluate` span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    TabCreated,
    Navigation,
    Activation,
    ConfigChange,
    Reapply,
}

/// A request waiting for the coordinator's answer.
pub struct PendingRequest {
    pub envelope: Envelope,
    pub reply: oneshot::Sender<Response>,
}

/// Cloneable sender side of the coordinator's request channel.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl CoordinatorHandle {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<PendingRequest>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Send `request` and wait for the answer.
    pub async fn request(&self, sender: Option<TabId>, request: Request) -> Result<Response, CoordinatorError> {
        let (reply, rx) = oneshot::channel();
        let envelope = Envelope::new(sender, request);
        self.tx.send(PendingRequest { envelope, reply }).await.map_err(|_| CoordinatorError::Closed)?;
        rx.await.map_err(|_| CoordinatorError::Closed)
    }
}

/// The privileged-process propagation coordinator.
pub struct Coordinator {
    store: Arc<StateStore>,
    host: Arc<dyn TabHost>,
    policy: UrlPolicy,
    registry: TabRegistry,
    metrics: PropagationMetrics,
}

impl Coordinator {
    pub fn new(store: Arc<StateStore>, host: Arc<dyn TabHost>, policy: UrlPolicy) -> Self {
        Self { store, host, policy, registry: TabRegistry::new(), metrics: PropagationMetrics::new() }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn registry(&self) -> &TabRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &PropagationMetrics {
        &self.metrics
    }

    pub fn policy(&self) -> &UrlPolicy {
        &self.policy
    }

    /// Run the state machine once for `tab` against the current configuration.
    ///
    /// Safe to call concurrently for the same tab: the reload guard is claimed
    /// atomically and seeding is idempotent.
    pub async fn evaluate_tab(&self, tab: TabId, trigger: Trigger) -> TabPhase {
        let span = info_span!("coordinator.evaluate", tab = %tab, trigger = ?trigger);
        async move {
            self.registry.set_phase(tab, TabPhase::Evaluating);
            match self.try_evaluate(tab).await {
                Ok(phase) => {
                    self.registry.set_phase(tab, phase);
                    phase
                }
                Err(HostError::TabGone(_)) => {
                    debug!("tab went away during evaluation");
                    self.registry.purge(tab);
                    TabPhase::Unknown
                }
                Err(e) => {
                    warn!(error = %e, "tab evaluation failed; leaving it unfaked");
                    self.metrics.record_failure();
                    self.registry.mark_inactive(tab);
                    self.registry.set_phase(tab, TabPhase::Skipped);
                    TabPhase::Skipped
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn try_evaluate(&self, tab: TabId) -> Result<TabPhase, HostError> {
        let info = self.host.tab(tab).await?;
        if let Some(reason) = self.policy.restriction(&info.url) {
            debug!(url = %info.url, %reason, "skipping restricted tab");
            self.metrics.record_skip();
            self.registry.mark_inactive(tab);
            return Ok(TabPhase::Skipped);
        }
        let seed = self.store.read().context_state();
        if seed.is_some() && self.registry.claim_reload(tab) {
            info!(url = %info.url, "forcing one-time reload");
            self.host.reload(tab).await?;
            self.metrics.record_reload();
            return Ok(TabPhase::AwaitingReload);
        }
        let frames = self.host.inject(tab, &Injection::bootstrap(seed)).await?;
        self.registry.mark_active(tab);
        self.metrics.record_injection(frames as u64);
        info!(frames, faking = seed.is_some(), "tab seeded");
        Ok(TabPhase::Seeded)
    }

    /// Evaluate every open tab; failures stay per tab.
    pub async fn reapply_all(&self, trigger: Trigger) -> Vec<(TabId, TabPhase)> {
        let tabs = match self.host.list_tabs().await {
            Ok(tabs) => tabs,
            Err(e) => {
                warn!(error = %e, "cannot enumerate tabs");
                return Vec::new();
            }
        };
        let mut out = Vec::with_capacity(tabs.len());
        for t in tabs {
            out.push((t.id, self.evaluate_tab(t.id, trigger).await));
        }
        out
    }

    /// React to a committed store change.
    pub async fn on_config_changed(&self, change: &ConfigChange) -> Vec<(TabId, TabPhase)> {
        let span = info_span!(
            "coordinator.config_changed",
            version = change.version,
            enabled = change.new.enabled,
            stopped = change.new.clock_stopped
        );
        async move {
            if change.is_disable() {
                info!("faking disabled; clearing reload guard");
                self.registry.clear_reloads();
            }
            self.reapply_all(Trigger::ConfigChange).await
        }
        .instrument(span)
        .await
    }

    pub async fn handle_event(&self, event: TabEvent) {
        match event {
            TabEvent::Created(tab) => {
                self.evaluate_tab(tab, Trigger::TabCreated).await;
            }
            TabEvent::NavigationStarted(tab) => {
                self.evaluate_tab(tab, Trigger::Navigation).await;
            }
            TabEvent::Activated(tab) => {
                self.evaluate_tab(tab, Trigger::Activation).await;
            }
            TabEvent::Closed(tab) => {
                debug!(tab = %tab, "tab closed; purging");
                self.registry.purge(tab);
            }
        }
    }

    /// Answer one inter-context request. Mutations only go to the store; the
    /// resulting change reaches tabs through [`Coordinator::on_config_changed`].
    pub async fn handle(&self, envelope: Envelope) -> Response {
        let Envelope { id, sender, request } = envelope;
        match request {
            Request::GetGlobalConfig => Response::GlobalConfig { config: self.store.read() },
            Request::SetGlobalConfig { fake_instant, clock_stopped } => {
                let fake = match fake_instant.as_deref().map(Timestamp::parse).transpose() {
                    Ok(fake) => fake,
                    Err(e) => {
                        debug!(msg = %id, error = %e, "rejected SetGlobalConfig");
                        return Response::failed(e.to_string());
                    }
                };
                let patch = PartialGlobalConfig { fake_instant: fake, clock_stopped, ..Default::default() };
                match self.store.write(&patch) {
                    Ok(_) => Response::ok(),
                    Err(e) => {
                        warn!(msg = %id, error = %e, "SetGlobalConfig failed");
                        Response::failed(e.to_string())
                    }
                }
            }
            Request::ClearGlobalConfig => match self.store.clear() {
                Ok(_) => Response::ok(),
                Err(e) => {
                    warn!(msg = %id, error = %e, "ClearGlobalConfig failed");
                    Response::failed(e.to_string())
                }
            },
            Request::ReapplyGlobalConfig => {
                self.reapply_all(Trigger::Reapply).await;
                Response::ok()
            }
            Request::ContextBecameActive { fake_instant, tick_anchor, clock_stopped } => {
                if let Some(tab) = sender {
                    let state = ContextState { fake_instant, tick_anchor, clock_stopped };
                    let reported_at = self.store.clock().now();
                    self.registry.record_status(tab, ContextStatus { state, reported_at });
                } else {
                    debug!(msg = %id, "activation notice without a sender tab");
                }
                Response::Ack
            }
        }
    }

    /// Event loop: store changes, tab lifecycle events, and requests, one at a
    /// time. Returns once both the event and request channels are closed.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<TabEvent>,
        mut requests: mpsc::Receiver<PendingRequest>,
    ) {
        let mut changes = self.store.subscribe();
        let mut events_open = true;
        let mut requests_open = true;
        while events_open || requests_open {
            tokio::select! {
                change = changes.recv() => match change {
                    Ok(change) => {
                        self.on_config_changed(&change).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "config feed lagged; reapplying current config");
                        self.reapply_all(Trigger::ConfigChange).await;
                    }
                    Err(RecvError::Closed) => break,
                },
                event = events.recv(), if events_open => match event {
                    Some(event) => self.handle_event(event).await,
                    None => events_open = false,
                },
                pending = requests.recv(), if requests_open => match pending {
                    Some(PendingRequest { envelope, reply }) => {
                        let response = self.handle(envelope).await;
                        // The asker may have timed out.
                        let _ = reply.send(response);
                    }
                    None => requests_open = false,
                },
            }
        }
        debug!("coordinator loop finished");
    }
}
