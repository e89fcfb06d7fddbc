use anyhow::{Context, Result};
use qad_core::types::{PerTier, Tier};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::paths;

pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Environment variable overriding `cache.dir`.
pub const ENV_CACHE_DIR: &str = "QAD_CACHE_DIR";
/// Environment variable overriding `api.keys_file`.
pub const ENV_KEYS_FILE: &str = "QAD_API_KEYS";

/// Full dispatcher configuration.
///
/// Every section has defaults, so an absent or partial file is valid. Files
/// are deep-merged over the defaults: built-in, then user, then project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub tiers: TiersConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub wait: WaitConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

fn default_schema_version() -> u32 {
    CURRENT_SCHEMA_VERSION
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            tiers: TiersConfig::default(),
            retry: RetryConfig::default(),
            wait: WaitConfig::default(),
            cache: CacheConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

/// Quota, concurrency and endpoint for one tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierConfig {
    /// Endpoint path segment appended to the chat completions URL.
    pub endpoint: String,
    pub model: String,
    /// Ceiling on calls within any trailing 60 minutes.
    pub hourly_quota: u32,
    /// Ceiling on calls within any trailing 24 hours.
    pub daily_quota: u32,
    /// Number of slots (OS threads) for this tier.
    pub concurrency: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TiersConfig {
    #[serde(default = "default_small_tier")]
    pub small: TierConfig,
    #[serde(default = "default_large_tier")]
    pub large: TierConfig,
}

impl Default for TiersConfig {
    fn default() -> Self {
        Self {
            small: default_small_tier(),
            large: default_large_tier(),
        }
    }
}

fn default_small_tier() -> TierConfig {
    TierConfig {
        endpoint: "vnptai-hackathon-small".to_string(),
        model: "vnptai_hackathon_small".to_string(),
        hourly_quota: 60,
        daily_quota: 1000,
        concurrency: 4,
    }
}

fn default_large_tier() -> TierConfig {
    TierConfig {
        endpoint: "vnptai-hackathon-large".to_string(),
        model: "vnptai_hackathon_large".to_string(),
        hourly_quota: 40,
        daily_quota: 500,
        concurrency: 2,
    }
}

impl TiersConfig {
    pub fn get(&self, tier: Tier) -> &TierConfig {
        match tier {
            Tier::Small => &self.small,
            Tier::Large => &self.large,
        }
    }

    pub fn get_mut(&mut self, tier: Tier) -> &mut TierConfig {
        match tier {
            Tier::Small => &mut self.small,
            Tier::Large => &mut self.large,
        }
    }

    pub fn concurrency(&self) -> PerTier<usize> {
        PerTier::from_fn(|tier| self.get(tier).concurrency)
    }
}

/// Local retry of transient errors inside a slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    2_000
}

fn default_max_delay_ms() -> u64 {
    90_000
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Quota-exhaustion waiting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitConfig {
    /// Upper bound on a single supervisor sleep while a tier is paused.
    #[serde(default = "default_recheck_interval_secs")]
    pub recheck_interval_secs: u64,
    /// Minimum pause after an authoritative rate-limit signal.
    #[serde(default = "default_min_cooldown_secs")]
    pub min_cooldown_secs: u64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            recheck_interval_secs: default_recheck_interval_secs(),
            min_cooldown_secs: default_min_cooldown_secs(),
        }
    }
}

fn default_recheck_interval_secs() -> u64 {
    300
}

fn default_min_cooldown_secs() -> u64 {
    30
}

impl WaitConfig {
    pub fn recheck_interval(&self) -> Duration {
        Duration::from_secs(self.recheck_interval_secs)
    }

    pub fn min_cooldown(&self) -> Duration {
        Duration::from_secs(self.min_cooldown_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    /// Default version tag when `--cache-version` is not given.
    #[serde(default = "default_cache_version")]
    pub version: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            version: default_cache_version(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./cache")
}

fn default_cache_version() -> String {
    "v1".to_string()
}

/// HTTP transport settings shared by both tiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_keys_file")]
    pub keys_file: PathBuf,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            keys_file: default_keys_file(),
            timeout_secs: default_timeout_secs(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            max_tokens: default_max_tokens(),
            seed: Some(42),
        }
    }
}

fn default_base_url() -> String {
    "https://api.idg.vnpt.vn".to_string()
}

fn default_keys_file() -> PathBuf {
    PathBuf::from("api-keys.json")
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_temperature() -> f64 {
    0.2
}

fn default_top_p() -> f64 {
    0.9
}

fn default_top_k() -> u32 {
    10
}

fn default_max_tokens() -> u32 {
    2000
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Deep merge two TOML values. Overlay wins for non-table values.
fn merge_toml_values(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_map), toml::Value::Table(overlay_map)) => {
            for (key, overlay_val) in overlay_map {
                let merged_val = match base_map.remove(&key) {
                    Some(base_val) => merge_toml_values(base_val, overlay_val),
                    None => overlay_val,
                };
                base_map.insert(key, merged_val);
            }
            toml::Value::Table(base_map)
        }
        (_, overlay) => overlay,
    }
}

impl DispatchConfig {
    /// Load config with the fallback chain: built-in defaults, then
    /// `~/.config/qad/config.toml`, then `<project_root>/.qad/config.toml`.
    /// Missing files are skipped. Environment overrides apply last.
    pub fn load(project_root: &Path) -> Result<Self> {
        let project_path = paths::project_config_path(project_root);
        let user_path = paths::user_config_path();
        let mut config = Self::load_with_paths(user_path.as_deref(), &project_path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load defaults merged with a single explicit file (`--config`).
    pub fn load_file(path: &Path) -> Result<Self> {
        let mut config = Self::load_layers(&[path])?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load config from explicit paths. Testable without global filesystem state.
    pub fn load_with_paths(user_path: Option<&Path>, project_path: &Path) -> Result<Self> {
        let mut layers: Vec<&Path> = Vec::new();
        if let Some(user) = user_path.filter(|p| p.exists()) {
            layers.push(user);
        }
        if project_path.exists() {
            layers.push(project_path);
        }
        Self::load_layers(&layers)
    }

    fn load_layers(layers: &[&Path]) -> Result<Self> {
        let mut merged = toml::Value::try_from(Self::default())
            .context("Failed to serialize default config")?;
        for path in layers {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let overlay: toml::Value = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config: {}", path.display()))?;
            debug!(path = %path.display(), "Merging config layer");
            merged = merge_toml_values(merged, overlay);
        }
        let config: Self = merged
            .try_into()
            .context("Failed to deserialize merged config")?;
        config.check_schema_version()?;
        Ok(config)
    }

    /// Parse a complete config from a TOML string, merged over defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let base = toml::Value::try_from(Self::default())
            .context("Failed to serialize default config")?;
        let overlay: toml::Value = toml::from_str(content).context("Failed to parse config")?;
        let config: Self = merge_toml_values(base, overlay)
            .try_into()
            .context("Failed to deserialize merged config")?;
        config.check_schema_version()?;
        Ok(config)
    }

    /// Apply `QAD_CACHE_DIR` / `QAD_API_KEYS` if set and non-empty.
    pub fn apply_env_overrides(&mut self) {
        if let Some(dir) = std::env::var_os(ENV_CACHE_DIR).filter(|v| !v.is_empty()) {
            self.cache.dir = PathBuf::from(dir);
        }
        if let Some(keys) = std::env::var_os(ENV_KEYS_FILE).filter(|v| !v.is_empty()) {
            self.api.keys_file = PathBuf::from(keys);
        }
    }

    pub fn check_schema_version(&self) -> Result<()> {
        if self.schema_version > CURRENT_SCHEMA_VERSION {
            anyhow::bail!(
                "Config schema version {} is newer than this binary supports (v{})",
                self.schema_version,
                CURRENT_SCHEMA_VERSION
            );
        }
        Ok(())
    }

    /// Save config to `<project_root>/.qad/config.toml`.
    pub fn save(&self, project_root: &Path) -> Result<()> {
        let config_path = paths::project_config_path(project_root);
        if let Some(dir) = config_path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config dir: {}", dir.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config: {}", config_path.display()))?;
        Ok(())
    }

    /// Override a tier's slot count (CLI `--small-concurrency` etc).
    pub fn set_concurrency(&mut self, tier: Tier, concurrency: usize) {
        self.tiers.get_mut(tier).concurrency = concurrency;
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
