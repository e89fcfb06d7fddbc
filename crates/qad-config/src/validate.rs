use anyhow::{Result, bail};
use qad_core::types::Tier;
use std::path::Path;
use tracing::warn;

use crate::config::{DispatchConfig, TierConfig};

/// Upper bound on slots per tier.
pub const MAX_CONCURRENCY: usize = 64;

/// Load the layered config for `project_root` and validate it.
pub fn validate_config(project_root: &Path) -> Result<DispatchConfig> {
    let config = DispatchConfig::load(project_root)?;
    validate_loaded_config(&config)?;
    Ok(config)
}

/// Validate an already-loaded config.
pub fn validate_loaded_config(config: &DispatchConfig) -> Result<()> {
    for tier in Tier::ALL {
        validate_tier(tier, config.tiers.get(tier))?;
    }
    validate_retry(config)?;
    validate_wait(config)?;
    validate_api(config)?;
    Ok(())
}

fn validate_tier(tier: Tier, tier_config: &TierConfig) -> Result<()> {
    if tier_config.endpoint.trim().is_empty() {
        bail!("tiers.{tier}.endpoint cannot be empty");
    }
    if tier_config.hourly_quota == 0 {
        bail!("tiers.{tier}.hourly_quota must be > 0 (got 0)");
    }
    if tier_config.daily_quota == 0 {
        bail!("tiers.{tier}.daily_quota must be > 0 (got 0)");
    }
    if tier_config.daily_quota < tier_config.hourly_quota {
        bail!(
            "tiers.{tier}.daily_quota ({}) must be >= hourly_quota ({})",
            tier_config.daily_quota,
            tier_config.hourly_quota
        );
    }
    if tier_config.concurrency == 0 || tier_config.concurrency > MAX_CONCURRENCY {
        bail!(
            "tiers.{tier}.concurrency must be in 1..={MAX_CONCURRENCY} (got {})",
            tier_config.concurrency
        );
    }
    if tier_config.concurrency as u64 > u64::from(tier_config.hourly_quota) {
        warn!(
            tier = %tier,
            concurrency = tier_config.concurrency,
            hourly_quota = tier_config.hourly_quota,
            "More slots than hourly quota; extra slots will idle"
        );
    }
    Ok(())
}

fn validate_retry(config: &DispatchConfig) -> Result<()> {
    let retry = &config.retry;
    if retry.max_attempts == 0 {
        bail!("retry.max_attempts must be >= 1 (got 0)");
    }
    if retry.base_delay_ms > retry.max_delay_ms {
        bail!(
            "retry.base_delay_ms ({}) must be <= retry.max_delay_ms ({})",
            retry.base_delay_ms,
            retry.max_delay_ms
        );
    }
    Ok(())
}

fn validate_wait(config: &DispatchConfig) -> Result<()> {
    if config.wait.recheck_interval_secs == 0 {
        bail!("wait.recheck_interval_secs must be > 0 (got 0)");
    }
    Ok(())
}

fn validate_api(config: &DispatchConfig) -> Result<()> {
    let api = &config.api;
    if !(api.base_url.starts_with("http://") || api.base_url.starts_with("https://")) {
        bail!(
            "api.base_url must start with http:// or https:// (got '{}')",
            api.base_url
        );
    }
    if api.timeout_secs == 0 {
        bail!("api.timeout_secs must be > 0 (got 0)");
    }
    if !(0.0..=2.0).contains(&api.temperature) {
        bail!("api.temperature must be in 0.0..=2.0 (got {})", api.temperature);
    }
    Ok(())
}

#[cfg(test)]
#[path = "validate_tests.rs"]
mod tests;
