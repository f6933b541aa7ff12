//! Time source injected into every component.
//!
//! Decay, absence tracking and recall timestamps all read "now" through a
//! [`Clock`], so simulations and tests can move time forward without
//! sleeping.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// A source of wall-clock time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Start the clock at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Start the clock at the current system time.
    #[must_use]
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    /// Move the clock forward. Negative durations are ignored so time never
    /// runs backwards.
    pub fn advance(&self, by: Duration) {
        if by > Duration::zero() {
            *self.now.lock() += by;
        }
    }

    /// Jump to `to` if it is not earlier than the current reading.
    pub fn set(&self, to: DateTime<Utc>) {
        let mut now = self.now.lock();
        if to > *now {
            *now = to;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// Fractional days between two instants, floored at zero.
#[must_use]
pub fn days_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    const MILLIS_PER_DAY: f64 = 86_400_000.0;
    ((later - earlier).num_milliseconds() as f64 / MILLIS_PER_DAY).max(0.0)
}
