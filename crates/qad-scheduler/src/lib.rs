//! Scheduler: rolling-window quota tracking, tier fallback decisions and
//! rate-limit signal detection.

pub mod detect;
pub mod fallback;
pub mod rate_limit;

pub use detect::{RateLimitDetected, detect_rate_limit, is_rate_limit_code};
pub use fallback::{ExhaustedAction, TierStatus, decide_exhausted, should_fallback};
pub use rate_limit::{QuotaPolicy, RateLimitTracker, Reservation, WindowSnapshot};
