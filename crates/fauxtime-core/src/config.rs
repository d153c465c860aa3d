//! Virtual-time configuration: the durable global record, partial updates, and
//! the per-context mirror every date/time read resolves through.

use serde::{Deserialize, Serialize};

use crate::{CoreError, Timestamp};

/// The single global configuration owned by the state store.
///
/// Invariants (checked by [`GlobalConfig::check_invariants`]):
/// - `clock_stopped` iff `tick_anchor.is_none()`
/// - `fake_instant.is_none()` iff `!enabled`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalConfig {
    /// Master switch.
    pub enabled: bool,
    /// Instant shown while stopped; baseline while running.
    pub fake_instant: Option<Timestamp>,
    /// Real instant at which running mode last (re)started.
    pub tick_anchor: Option<Timestamp>,
    /// Whether the virtual clock is frozen.
    pub clock_stopped: bool,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self { enabled: false, fake_instant: None, tick_anchor: None, clock_stopped: true }
    }
}

/// A partial update merged onto the current [`GlobalConfig`].
///
/// `None` fields leave the current value alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PartialGlobalConfig {
    /// `Some(false)` resets to defaults; `Some(true)` requires a fake instant.
    pub enabled: Option<bool>,
    /// New baseline; implies `enabled = true`.
    pub fake_instant: Option<Timestamp>,
    /// Explicit anchor; ignored when the result is stopped.
    pub tick_anchor: Option<Timestamp>,
    /// Freeze (`true`) or run (`false`).
    pub clock_stopped: Option<bool>,
}

impl PartialGlobalConfig {
    /// Patch that only sets the fake instant.
    #[must_use]
    pub fn at(instant: Timestamp) -> Self {
        Self { fake_instant: Some(instant), ..Self::default() }
    }

    /// Builder: set `clock_stopped`.
    #[must_use]
    pub const fn stopped(mut self, stopped: bool) -> Self {
        self.clock_stopped = Some(stopped);
        self
    }

    /// Builder: set an explicit tick anchor.
    #[must_use]
    pub const fn anchored_at(mut self, anchor: Timestamp) -> Self {
        self.tick_anchor = Some(anchor);
        self
    }

    /// Patch that disables faking entirely.
    #[must_use]
    pub fn disable() -> Self {
        Self { enabled: Some(false), ..Self::default() }
    }
}

impl GlobalConfig {
    /// Verify both record invariants.
    pub fn check_invariants(&self) -> Result<(), CoreError> {
        if self.clock_stopped != self.tick_anchor.is_none() {
            return Err(CoreError::Invariant("clock_stopped must hold iff tick_anchor is unset"));
        }
        if self.fake_instant.is_none() == self.enabled {
            return Err(CoreError::Invariant("fake_instant must be set iff enabled"));
        }
        Ok(())
    }

    /// The context mirror to seed into pages, or `None` when faking is disabled.
    #[must_use]
    pub fn context_state(&self) -> Option<ContextState> {
        if !self.enabled {
            return None;
        }
        self.fake_instant.map(|fake| ContextState {
            fake_instant: Some(fake),
            tick_anchor: self.tick_anchor,
            clock_stopped: self.clock_stopped,
        })
    }

    /// Virtual instant under this configuration, or `None` when disabled.
    #[must_use]
    pub fn virtual_instant(&self, real_now: Timestamp) -> Option<Timestamp> {
        self.context_state().map(|s| s.virtual_instant(real_now))
    }

    /// Read-merge: apply `patch` on top of `self` at real time `now`.
    ///
    /// Whenever the anchor is reset on a running clock without a new baseline, the
    /// elapsed virtual time is folded into `fake_instant` so the visible clock does
    /// not jump. Stopping always clears the anchor; running without an explicit
    /// anchor always anchors at `now`.
    pub fn merge(&self, patch: &PartialGlobalConfig, now: Timestamp) -> Result<Self, CoreError> {
        if patch.enabled == Some(false) {
            return Ok(Self::default());
        }
        let mut next = *self;
        let was_running = !self.clock_stopped;

        if let Some(instant) = patch.fake_instant {
            next.fake_instant = Some(instant);
            next.enabled = true;
        } else if was_running && patch.clock_stopped.is_some() && patch.tick_anchor.is_none() {
            if let Some(current) = self.virtual_instant(now) {
                next.fake_instant = Some(current);
            }
        }
        if patch.enabled == Some(true) && next.fake_instant.is_none() {
            return Err(CoreError::Invariant("cannot enable without a fake instant"));
        }

        next.clock_stopped = patch.clock_stopped.unwrap_or(self.clock_stopped);
        next.tick_anchor = if next.clock_stopped {
            None
        } else {
            match (patch.tick_anchor, patch.clock_stopped, patch.fake_instant) {
                (Some(anchor), _, _) => Some(anchor),
                (None, Some(_), _) | (None, _, Some(_)) => Some(now),
                (None, None, None) => self.tick_anchor.or(Some(now)),
            }
        };
        next.check_invariants()?;
        Ok(next)
    }
}

/// Per-context mirror of the effective fake-time parameters.
///
/// `fake_instant == None` is the "disabled" state: reads resolve to real time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextState {
    /// Frozen instant, or baseline while running.
    pub fake_instant: Option<Timestamp>,
    /// Real instant running mode started at.
    pub tick_anchor: Option<Timestamp>,
    /// Whether the clock is frozen.
    pub clock_stopped: bool,
}

impl ContextState {
    /// A frozen clock showing `instant`.
    #[must_use]
    pub const fn frozen(instant: Timestamp) -> Self {
        Self { fake_instant: Some(instant), tick_anchor: None, clock_stopped: true }
    }

    /// A running clock that showed `instant` at real time `anchor`.
    #[must_use]
    pub const fn running(instant: Timestamp, anchor: Timestamp) -> Self {
        Self { fake_instant: Some(instant), tick_anchor: Some(anchor), clock_stopped: false }
    }

    /// Whether this state fakes anything at all.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.fake_instant.is_some()
    }

    /// Resolve the virtual instant for `real_now`. Evaluated fresh per call.
    #[must_use]
    pub fn virtual_instant(&self, real_now: Timestamp) -> Timestamp {
        match self.fake_instant {
            None => real_now,
            Some(fake) if self.clock_stopped => fake,
            Some(fake) => {
                let anchor = self.tick_anchor.unwrap_or(real_now);
                fake.saturating_add_millis(real_now.millis_since(anchor))
            }
        }
    }
}

/// Virtual instant for an optional context state: real time when absent.
#[must_use]
pub fn virtual_instant(state: Option<&ContextState>, real_now: Timestamp) -> Timestamp {
    state.map_or(real_now, |s| s.virtual_instant(real_now))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(ms: i64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    #[test]
    fn default_satisfies_invariants() {
        let d = GlobalConfig::default();
        d.check_invariants().unwrap();
        assert!(d.context_state().is_none());
    }

    #[test]
    fn frozen_ignores_elapsed_time() {
        let s = ContextState::frozen(ts(5_000));
        assert_eq!(s.virtual_instant(ts(1)), ts(5_000));
        assert_eq!(s.virtual_instant(ts(99_999)), ts(5_000));
    }

    #[test]
    fn running_adds_elapsed_time() {
        let s = ContextState::running(ts(5_000), ts(100));
        assert_eq!(s.virtual_instant(ts(100)), ts(5_000));
        assert_eq!(s.virtual_instant(ts(2_100)), ts(7_000));
    }

    #[test]
    fn absent_or_disabled_state_is_real_time() {
        assert_eq!(virtual_instant(None, ts(42)), ts(42));
        assert_eq!(virtual_instant(Some(&ContextState::default()), ts(42)), ts(42));
    }

    #[test]
    fn setting_instant_enables() {
        let next = GlobalConfig::default().merge(&PartialGlobalConfig::at(ts(10)), ts(0)).unwrap();
        assert!(next.enabled);
        assert_eq!(next.fake_instant, Some(ts(10)));
        assert!(next.clock_stopped);
        assert_eq!(next.tick_anchor, None);
    }

    #[test]
    fn running_without_anchor_anchors_now() {
        let cfg = GlobalConfig::default().merge(&PartialGlobalConfig::at(ts(10)), ts(0)).unwrap();
        let next = cfg.merge(&PartialGlobalConfig::default().stopped(false), ts(500)).unwrap();
        assert_eq!(next.tick_anchor, Some(ts(500)));
        assert_eq!(next.fake_instant, Some(ts(10)));
    }

    #[test]
    fn stopping_clears_anchor_even_if_one_is_passed() {
        let cfg = GlobalConfig::default()
            .merge(&PartialGlobalConfig::at(ts(10)).stopped(false), ts(0))
            .unwrap();
        let patch = PartialGlobalConfig::default().stopped(true).anchored_at(ts(7));
        let next = cfg.merge(&patch, ts(1_000)).unwrap();
        assert_eq!(next.tick_anchor, None);
        assert!(next.clock_stopped);
    }

    #[test]
    fn stopping_a_running_clock_freezes_where_it_was() {
        let cfg = GlobalConfig::default()
            .merge(&PartialGlobalConfig::at(ts(10_000)).stopped(false), ts(0))
            .unwrap();
        let next = cfg.merge(&PartialGlobalConfig::default().stopped(true), ts(3_000)).unwrap();
        assert_eq!(next.fake_instant, Some(ts(13_000)));
    }

    #[test]
    fn restarting_a_running_clock_does_not_jump() {
        let cfg = GlobalConfig::default()
            .merge(&PartialGlobalConfig::at(ts(10_000)).stopped(false), ts(0))
            .unwrap();
        let next = cfg.merge(&PartialGlobalConfig::default().stopped(false), ts(3_000)).unwrap();
        assert_eq!(next.tick_anchor, Some(ts(3_000)));
        assert_eq!(next.virtual_instant(ts(3_000)), Some(ts(13_000)));
    }

    #[test]
    fn disable_resets_to_default() {
        let cfg = GlobalConfig::default().merge(&PartialGlobalConfig::at(ts(10)), ts(0)).unwrap();
        assert_eq!(cfg.merge(&PartialGlobalConfig::disable(), ts(1)).unwrap(), GlobalConfig::default());
    }

    #[test]
    fn enabling_without_instant_is_rejected() {
        let patch = PartialGlobalConfig { enabled: Some(true), ..Default::default() };
        assert!(GlobalConfig::default().merge(&patch, ts(0)).is_err());
    }

    #[test]
    fn wire_shape_is_camel_case() {
        let v = serde_json::to_value(GlobalConfig::default()).unwrap();
        assert_eq!(
            v,
            serde_json::json!({"enabled": false, "fakeInstant": null, "tickAnchor": null, "clockStopped": true})
        );
    }
}
