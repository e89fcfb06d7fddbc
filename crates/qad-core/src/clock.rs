//! Time source for rate-limit windows and waits.
//!
//! Every timed decision in the dispatcher reads [`Clock::now`] and every wait
//! goes through [`Clock::elapse`], so tests can substitute [`ManualClock`] and
//! drive quota resets without sleeping.

use chrono::{DateTime, Utc};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Let `duration` of clock time pass.
    ///
    /// Returns how long the caller must actually block (on a sleep or a
    /// condition-variable timeout) for that time to have passed.
    fn elapse(&self, duration: Duration) -> Duration;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn elapse(&self, duration: Duration) -> Duration {
        duration
    }
}

/// Virtual clock. `elapse` moves time forward instantly.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move time forward without any caller waiting.
    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += to_chrono(duration);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn elapse(&self, duration: Duration) -> Duration {
        self.advance(duration);
        Duration::ZERO
    }
}

/// Convert a std duration to chrono, saturating instead of overflowing.
pub fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// Convert a chrono duration to std; negative spans clamp to zero.
pub fn to_std(duration: chrono::Duration) -> Duration {
    duration.to_std().unwrap_or(Duration::ZERO)
}
