//! Real-time source abstraction: the genuine clock every virtual instant is derived from.

use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};

use crate::Timestamp;

/// Clock abstraction for the genuine wall clock. Returns epoch milliseconds.
pub trait Clock: Send + Sync {
    /// Current real instant.
    fn now(&self) -> Timestamp;
}

/// System (production) clock. Wraps `chrono::Utc::now`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(chrono::Utc::now().timestamp_millis())
    }
}

/// Manually driven clock for tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    inner: Mutex<i64>,
}

impl ManualClock {
    /// Create a manual clock reading `start`.
    pub fn new(start: Timestamp) -> Self {
        Self { inner: Mutex::new(start.as_millis()) }
    }

    /// Advance the clock by `delta_ms`.
    pub fn advance_ms(&self, delta_ms: i64) {
        let mut t = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        *t = t.saturating_add(delta_ms);
    }

    /// Jump to an absolute instant (may move backwards).
    pub fn set(&self, value: Timestamp) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = value.as_millis();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(*self.inner.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

static PROCESS_CLOCK: OnceLock<RwLock<Arc<dyn Clock>>> = OnceLock::new();

/// The process-wide default real clock (system clock unless swapped).
pub fn process_clock() -> Arc<dyn Clock> {
    let lock = PROCESS_CLOCK.get_or_init(|| RwLock::new(Arc::new(SystemClock)));
    let guard = lock.read().unwrap_or_else(PoisonError::into_inner);
    Arc::clone(&*guard)
}

/// Swap the process-wide default clock. Used by tests and simulations.
pub fn set_process_clock(clock: Arc<dyn Clock>) {
    let lock = PROCESS_CLOCK.get_or_init(|| RwLock::new(Arc::new(SystemClock)));
    *lock.write().unwrap_or_else(PoisonError::into_inner) = clock;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_is_deterministic() {
        let clk = ManualClock::new(Timestamp::from_millis(1_000));
        assert_eq!(clk.now().as_millis(), 1_000);
        clk.advance_ms(5);
        assert_eq!(clk.now().as_millis(), 1_005);
        clk.set(Timestamp::from_millis(2_000));
        assert_eq!(clk.now().as_millis(), 2_000);
    }

    #[test]
    fn system_clock_is_past_2020() {
        assert!(SystemClock.now().as_millis() > 1_577_836_800_000);
    }

    #[test]
    fn process_clock_can_be_swapped() {
        let original = process_clock();
        set_process_clock(Arc::new(ManualClock::new(Timestamp::from_millis(42))));
        assert_eq!(process_clock().now().as_millis(), 42);
        set_process_clock(original);
    }
}
