//! Tier fallback decisions.
//!
//! Two pure decisions the dispatcher consults under its lock:
//! [`should_fallback`] for moving queued work off a paused tier, and
//! [`decide_exhausted`] for a task whose local retries ran out.

use qad_core::types::{PerTier, Tier};
use serde::Serialize;

/// Dispatcher-owned view of one tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierStatus {
    /// Tasks queued or in flight destined for this tier.
    pub pending: usize,
    /// Quota exhausted or rate-limit signal active.
    pub paused: bool,
}

/// Whether queued work on `source` may move to `target`.
///
/// | source paused | source pending | target paused | allowed |
/// |---|---|---|---|
/// | true  | >0 | false | yes |
/// | false | >0 | any   | no  |
/// | any   | 0  | any   | no  |
/// | true  | >0 | true  | no  |
///
/// The target's backlog is irrelevant: fallback only uses otherwise idle
/// capacity, and a healthy source is never pre-empted.
pub fn should_fallback(source: Tier, target: Tier, states: &PerTier<TierStatus>) -> bool {
    if source == target {
        return false;
    }
    let src = states[source];
    let dst = states[target];
    src.paused && src.pending > 0 && !dst.paused
}

/// What to do with a task whose transient-error retries are exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ExhaustedAction {
    /// Requeue the task on another tier.
    RetryOn { tier: Tier },
    /// No avenue left.
    Fail { reason: String },
}

/// Decide the next step after `failed` exhausted its retries.
///
/// The other tier gets exactly one chance, and only if it has not been tried
/// for this task and is not paused right now.
pub fn decide_exhausted(
    failed: Tier,
    tiers_tried: &[Tier],
    states: &PerTier<TierStatus>,
) -> ExhaustedAction {
    let other = failed.other();
    if tiers_tried.contains(&other) {
        return ExhaustedAction::Fail {
            reason: "all tiers tried".to_string(),
        };
    }
    if states[other].paused {
        return ExhaustedAction::Fail {
            reason: format!("tier '{other}' is paused"),
        };
    }
    ExhaustedAction::RetryOn { tier: other }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn states(small: (bool, usize), large: (bool, usize)) -> PerTier<TierStatus> {
        PerTier::new(
            TierStatus {
                paused: small.0,
                pending: small.1,
            },
            TierStatus {
                paused: large.0,
                pending: large.1,
            },
        )
    }

    #[test]
    fn test_paused_source_with_backlog_reroutes() {
        let s = states((true, 5), (false, 2));
        assert!(should_fallback(Tier::Small, Tier::Large, &s));
    }

    #[test]
    fn test_empty_source_does_not_reroute() {
        let s = states((true, 0), (false, 2));
        assert!(!should_fallback(Tier::Small, Tier::Large, &s));
    }

    #[test]
    fn test_healthy_source_is_never_preempted() {
        for target_paused in [false, true] {
            let s = states((false, 5), (target_paused, 0));
            assert!(!should_fallback(Tier::Small, Tier::Large, &s));
        }
    }

    #[test]
    fn test_paused_target_blocks_reroute() {
        let s = states((true, 5), (true, 0));
        assert!(!should_fallback(Tier::Small, Tier::Large, &s));
    }

    #[test]
    fn test_target_backlog_does_not_matter() {
        let s = states((false, 0), (true, 3));
        assert!(should_fallback(Tier::Large, Tier::Small, &s));
        let s = states((false, 1000), (true, 3));
        assert!(should_fallback(Tier::Large, Tier::Small, &s));
    }

    #[test]
    fn test_same_tier_never_falls_back() {
        let s = states((true, 5), (false, 0));
        assert!(!should_fallback(Tier::Small, Tier::Small, &s));
    }

    #[test]
    fn test_full_decision_table() {
        for src_paused in [false, true] {
            for src_pending in [0usize, 1, 7] {
                for dst_paused in [false, true] {
                    let s = states((src_paused, src_pending), (dst_paused, 4));
                    let expected = src_paused && src_pending > 0 && !dst_paused;
                    assert_eq!(
                        should_fallback(Tier::Small, Tier::Large, &s),
                        expected,
                        "src_paused={src_paused} src_pending={src_pending} dst_paused={dst_paused}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_exhausted_retries_on_other_tier_once() {
        let s = states((false, 3), (false, 1));
        assert_eq!(
            decide_exhausted(Tier::Small, &[Tier::Small], &s),
            ExhaustedAction::RetryOn { tier: Tier::Large }
        );
    }

    #[test]
    fn test_exhausted_fails_when_other_tier_tried() {
        let s = states((false, 3), (false, 1));
        let action = decide_exhausted(Tier::Large, &[Tier::Small, Tier::Large], &s);
        assert!(matches!(action, ExhaustedAction::Fail { .. }));
    }

    #[test]
    fn test_exhausted_fails_when_other_tier_paused() {
        let s = states((false, 3), (true, 1));
        let action = decide_exhausted(Tier::Small, &[Tier::Small], &s);
        assert_eq!(
            action,
            ExhaustedAction::Fail {
                reason: "tier 'large' is paused".to_string()
            }
        );
    }
}
