//! Rolling-window quota tracking per tier.
//!
//! The tracker is both preventive and reactive. [`RateLimitTracker::try_reserve`]
//! refuses a call before the local hourly or daily ceiling would be crossed,
//! and [`RateLimitTracker::record_rate_limit_signal`] lets an authoritative
//! 429 from the service pause a tier even when the local count disagrees.
//!
//! All state sits behind one mutex; the check and the record in
//! `try_reserve` happen under the same guard, so concurrent slots can never
//! overrun a quota. Nothing here blocks or calls back into the caller.

use chrono::{DateTime, Utc};
use qad_core::clock::{Clock, to_chrono, to_std};
use qad_core::types::{PerTier, Tier};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

pub const HOURLY_WINDOW: Duration = Duration::from_secs(60 * 60);
pub const DAILY_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaPolicy {
    pub hourly_quota: u32,
    pub daily_quota: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    Allowed,
    Denied,
}

/// Window counts for logging and reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowSnapshot {
    pub tier: Tier,
    pub hourly_used: usize,
    pub hourly_quota: u32,
    pub daily_used: usize,
    pub daily_quota: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused_until: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct RateLimitWindow {
    policy: QuotaPolicy,
    /// Sorted ascending; pruned to the daily horizon.
    calls: VecDeque<DateTime<Utc>>,
    /// Set by an authoritative rate-limit signal.
    paused_until: Option<DateTime<Utc>>,
}

fn saturating_add(ts: DateTime<Utc>, span: Duration) -> DateTime<Utc> {
    ts.checked_add_signed(to_chrono(span))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn saturating_sub(ts: DateTime<Utc>, span: Duration) -> DateTime<Utc> {
    ts.checked_sub_signed(to_chrono(span))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl RateLimitWindow {
    fn new(policy: QuotaPolicy) -> Self {
        Self {
            policy,
            calls: VecDeque::new(),
            paused_until: None,
        }
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let horizon = saturating_sub(now, DAILY_WINDOW);
        while self.calls.front().is_some_and(|ts| *ts <= horizon) {
            self.calls.pop_front();
        }
        if self.paused_until.is_some_and(|until| until <= now) {
            self.paused_until = None;
        }
    }

    /// Index of the first call inside the trailing hour.
    fn hourly_start(&self, now: DateTime<Utc>) -> usize {
        let horizon = saturating_sub(now, HOURLY_WINDOW);
        self.calls.partition_point(|ts| *ts <= horizon)
    }

    fn hourly_count(&self, now: DateTime<Utc>) -> usize {
        self.calls.len() - self.hourly_start(now)
    }

    fn insert(&mut self, ts: DateTime<Utc>) {
        let pos = self.calls.partition_point(|t| *t <= ts);
        self.calls.insert(pos, ts);
    }

    /// Latest instant at which every active blocking condition has cleared,
    /// or None when a reservation would be allowed now.
    fn blocked_until(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut until: Option<DateTime<Utc>> = self.paused_until.filter(|u| *u > now);

        let start = self.hourly_start(now);
        let hourly = self.calls.len() - start;
        let hourly_quota = self.policy.hourly_quota as usize;
        if hourly >= hourly_quota {
            // The (hourly - quota + 1) oldest calls must age out.
            let wake = self
                .calls
                .get(start + (hourly - hourly_quota))
                .map(|ts| saturating_add(*ts, HOURLY_WINDOW))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            until = Some(until.map_or(wake, |u| u.max(wake)));
        }

        let daily = self.calls.len();
        let daily_quota = self.policy.daily_quota as usize;
        if daily >= daily_quota {
            let wake = self
                .calls
                .get(daily - daily_quota)
                .map(|ts| saturating_add(*ts, DAILY_WINDOW))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            until = Some(until.map_or(wake, |u| u.max(wake)));
        }

        until.filter(|u| *u > now)
    }
}

/// Per-tier rolling-window rate limiter.
pub struct RateLimitTracker {
    clock: Arc<dyn Clock>,
    min_cooldown: Duration,
    windows: Mutex<PerTier<RateLimitWindow>>,
}

impl std::fmt::Debug for RateLimitTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitTracker")
            .field("min_cooldown", &self.min_cooldown)
            .finish()
    }
}

impl RateLimitTracker {
    pub fn new(quotas: PerTier<QuotaPolicy>, min_cooldown: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            min_cooldown,
            windows: Mutex::new(PerTier::new(
                RateLimitWindow::new(quotas.small),
                RateLimitWindow::new(quotas.large),
            )),
        }
    }

    fn windows(&self) -> MutexGuard<'_, PerTier<RateLimitWindow>> {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check capacity and, if allowed, record the call in one step.
    pub fn try_reserve(&self, tier: Tier) -> Reservation {
        let now = self.clock.now();
        let mut windows = self.windows();
        let window = &mut windows[tier];
        window.prune(now);
        if window.blocked_until(now).is_some() {
            debug!(
                tier = %tier,
                hourly_used = window.hourly_count(now),
                daily_used = window.calls.len(),
                "Reservation denied"
            );
            return Reservation::Denied;
        }
        window.insert(now);
        Reservation::Allowed
    }

    /// Record a call made outside a reservation.
    pub fn record_call(&self, tier: Tier, timestamp: DateTime<Utc>) {
        let now = self.clock.now();
        let mut windows = self.windows();
        let window = &mut windows[tier];
        window.prune(now);
        if timestamp > saturating_sub(now, DAILY_WINDOW) {
            window.insert(timestamp);
        }
    }

    /// Authoritative override after the service reported a rate limit.
    ///
    /// Pauses the tier until `max(now + min_cooldown, oldest-in-hour + 60 min)`
    /// and returns that instant.
    pub fn record_rate_limit_signal(&self, tier: Tier) -> DateTime<Utc> {
        let now = self.clock.now();
        let mut windows = self.windows();
        let window = &mut windows[tier];
        window.prune(now);

        let cooldown_end = saturating_add(now, self.min_cooldown);
        let window_end = window
            .calls
            .get(window.hourly_start(now))
            .map(|oldest| saturating_add(*oldest, HOURLY_WINDOW));
        let until = window_end.map_or(cooldown_end, |end| end.max(cooldown_end));
        let until = window.paused_until.map_or(until, |prev| prev.max(until));
        window.paused_until = Some(until);

        warn!(
            tier = %tier,
            paused_until = %until,
            hourly_used = window.hourly_count(now),
            "Rate-limit signal received; tier paused"
        );
        until
    }

    /// True while a signal pause is active or the local window is full.
    pub fn is_paused(&self, tier: Tier) -> bool {
        let now = self.clock.now();
        let mut windows = self.windows();
        windows[tier].prune(now);
        windows[tier].blocked_until(now).is_some()
    }

    /// Zero when a reservation would be allowed now; otherwise the time until
    /// the latest active blocking condition clears.
    pub fn time_until_capacity(&self, tier: Tier) -> Duration {
        let now = self.clock.now();
        let mut windows = self.windows();
        windows[tier].prune(now);
        windows[tier]
            .blocked_until(now)
            .map_or(Duration::ZERO, |until| to_std(until - now))
    }

    pub fn snapshot(&self, tier: Tier) -> WindowSnapshot {
        let now = self.clock.now();
        let mut windows = self.windows();
        let window = &mut windows[tier];
        window.prune(now);
        WindowSnapshot {
            tier,
            hourly_used: window.hourly_count(now),
            hourly_quota: window.policy.hourly_quota,
            daily_used: window.calls.len(),
            daily_quota: window.policy.daily_quota,
            paused_until: window.paused_until,
        }
    }
}

#[cfg(test)]
#[path = "rate_limit_tests.rs"]
mod tests;
