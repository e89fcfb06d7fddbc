//! 429 / rate-limit detection from HTTP responses.

use qad_core::types::Tier;
use serde::Serialize;

/// Information about a detected rate-limit event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitDetected {
    pub tier: Tier,
    pub matched_pattern: String,
}

/// Status codes the service uses for quota exhaustion.
///
/// The gateway answers 401 instead of 429 once a key's hourly quota is spent.
const RATE_LIMIT_STATUSES: &[u16] = &[429, 401];

const RATE_LIMIT_PATTERNS: &[&str] = &[
    "rate limit",
    "Rate limit",
    "too many requests",
    "Too Many Requests",
    "quota exceeded",
    "RESOURCE_EXHAUSTED",
];

/// Check an HTTP status and body for rate-limit indicators.
///
/// Successful responses are never treated as rate limits, even when the body
/// mentions one (model output may legitimately contain the words).
pub fn detect_rate_limit(tier: Tier, status: u16, body: &str) -> Option<RateLimitDetected> {
    if (200..300).contains(&status) {
        return None;
    }

    if RATE_LIMIT_STATUSES.contains(&status) {
        return Some(RateLimitDetected {
            tier,
            matched_pattern: format!("HTTP {status}"),
        });
    }

    RATE_LIMIT_PATTERNS
        .iter()
        .find(|pattern| body.contains(*pattern))
        .map(|pattern| RateLimitDetected {
            tier,
            matched_pattern: pattern.to_string(),
        })
}

/// Whether an error code embedded in a response payload means rate limiting.
pub fn is_rate_limit_code(code: i64) -> bool {
    u16::try_from(code).is_ok_and(|code| RATE_LIMIT_STATUSES.contains(&code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_429() {
        let result = detect_rate_limit(Tier::Small, 429, "");
        assert_eq!(result.unwrap().matched_pattern, "HTTP 429");
    }

    #[test]
    fn test_http_401_quota_exhausted() {
        let result = detect_rate_limit(Tier::Large, 401, "Unauthorized");
        let detected = result.unwrap();
        assert_eq!(detected.tier, Tier::Large);
        assert_eq!(detected.matched_pattern, "HTTP 401");
    }

    #[test]
    fn test_body_pattern_on_server_error() {
        let result = detect_rate_limit(Tier::Small, 503, "upstream: Too Many Requests");
        assert_eq!(result.unwrap().matched_pattern, "Too Many Requests");
    }

    #[test]
    fn test_quota_exceeded_body() {
        let result = detect_rate_limit(Tier::Large, 403, "error: quota exceeded for key");
        assert_eq!(result.unwrap().matched_pattern, "quota exceeded");
    }

    #[test]
    fn test_no_rate_limit_on_success() {
        let result = detect_rate_limit(Tier::Small, 200, "the answer mentions rate limit");
        assert!(result.is_none(), "Should not detect rate limit on 2xx");
    }

    #[test]
    fn test_no_rate_limit_unrelated_error() {
        assert!(detect_rate_limit(Tier::Small, 500, "Internal Server Error").is_none());
        assert!(detect_rate_limit(Tier::Large, 400, "bad request").is_none());
    }

    #[test]
    fn test_is_rate_limit_code() {
        assert!(is_rate_limit_code(429));
        assert!(is_rate_limit_code(401));
        assert!(!is_rate_limit_code(400));
        assert!(!is_rate_limit_code(-1));
        assert!(!is_rate_limit_code(i64::MAX));
    }
}
