use crate::types::Tier;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Rate limited on tier '{tier}'")]
    RateLimited { tier: Tier },

    #[error("Content filtered by tier '{tier}': {message}")]
    ContentFiltered { tier: Tier, message: String },

    #[error("Transient error on tier '{tier}': {message}")]
    TransientError { tier: Tier, message: String },

    #[error("Both tiers exhausted; next capacity in {wait_secs}s")]
    Exhausted { wait_secs: u64 },

    #[error("Task '{id}' failed permanently: {reason}")]
    PermanentFailure { id: String, reason: String },

    #[error("Invalid cache version '{0}': expected [A-Za-z0-9._-]+")]
    InvalidCacheVersion(String),

    #[error("Cache entry '{0}' already exists")]
    CacheEntryExists(String),

    #[error("Cache locked by PID {0}")]
    CacheLocked(u32),

    #[error("No API credentials for tier '{0}'")]
    MissingCredentials(Tier),
}
