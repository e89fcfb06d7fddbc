//! API key file loading.
//!
//! The key file is a JSON list of `{llmApiName, authorization, tokenId,
//! tokenKey}` records. A record belongs to a tier when its lowercased name
//! contains `small` or `large`; other records (embedding keys) are ignored.

use anyhow::{Context, Result};
use qad_core::error::AppError;
use qad_core::types::{PerTier, Tier};
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

/// Headers sent with every call to one tier.
#[derive(Clone, PartialEq, Eq)]
pub struct TierCredentials {
    pub authorization: String,
    pub token_id: String,
    pub token_key: String,
}

impl std::fmt::Debug for TierCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TierCredentials")
            .field("authorization", &"[REDACTED]")
            .field("token_id", &self.token_id)
            .field("token_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyRecord {
    #[serde(default)]
    llm_api_name: String,
    #[serde(default)]
    authorization: String,
    #[serde(default)]
    token_id: String,
    #[serde(default)]
    token_key: String,
}

impl KeyRecord {
    fn tier(&self) -> Option<Tier> {
        let name = self.llm_api_name.to_lowercase();
        if name.contains("small") {
            Some(Tier::Small)
        } else if name.contains("large") {
            Some(Tier::Large)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiKeys {
    tiers: PerTier<Option<TierCredentials>>,
}

impl ApiKeys {
    pub fn new(small: Option<TierCredentials>, large: Option<TierCredentials>) -> Self {
        Self {
            tiers: PerTier::new(small, large),
        }
    }

    /// Load keys from `path`. Later records override earlier ones for the
    /// same tier.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read API key file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse API key file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let records: Vec<KeyRecord> = serde_json::from_str(content)?;
        let mut keys = Self::default();
        for record in records {
            let Some(tier) = record.tier() else {
                debug!(name = %record.llm_api_name, "Skipping key record for unknown tier");
                continue;
            };
            keys.tiers[tier] = Some(TierCredentials {
                authorization: record.authorization,
                token_id: record.token_id,
                token_key: record.token_key,
            });
        }
        Ok(keys)
    }

    pub fn get(&self, tier: Tier) -> Option<&TierCredentials> {
        self.tiers[tier].as_ref()
    }

    /// Credentials for `tier`, or [`AppError::MissingCredentials`].
    pub fn require(&self, tier: Tier) -> Result<&TierCredentials, AppError> {
        self.get(tier).ok_or(AppError::MissingCredentials(tier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_FILE: &str = r#"[
        {"llmApiName": "LLM small", "authorization": "Bearer s", "tokenId": "sid", "tokenKey": "skey"},
        {"llmApiName": "LLM embedings", "authorization": "Bearer e", "tokenId": "eid", "tokenKey": "ekey"},
        {"llmApiName": "LLM LARGE", "authorization": "Bearer l", "tokenId": "lid", "tokenKey": "lkey"}
    ]"#;

    #[test]
    fn test_parse_matches_tiers_by_name() {
        let keys = ApiKeys::parse(KEY_FILE).unwrap();
        let small = keys.require(Tier::Small).unwrap();
        assert_eq!(small.authorization, "Bearer s");
        assert_eq!(small.token_id, "sid");
        assert_eq!(keys.require(Tier::Large).unwrap().token_key, "lkey");
    }

    #[test]
    fn test_missing_tier_is_reported() {
        let keys = ApiKeys::parse(r#"[{"llmApiName": "small", "authorization": "x"}]"#).unwrap();
        let err = keys.require(Tier::Large).unwrap_err();
        assert!(matches!(err, AppError::MissingCredentials(Tier::Large)));
        assert_eq!(keys.get(Tier::Small).unwrap().token_id, "");
    }

    #[test]
    fn test_load_from_file_and_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api-keys.json");
        std::fs::write(&path, KEY_FILE).unwrap();
        assert!(ApiKeys::load(&path).unwrap().get(Tier::Large).is_some());

        std::fs::write(&path, "{not json").unwrap();
        let err = ApiKeys::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse API key file"));

        let missing = ApiKeys::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(missing.to_string().contains("Failed to read API key file"));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let keys = ApiKeys::parse(KEY_FILE).unwrap();
        let printed = format!("{:?}", keys.get(Tier::Small).unwrap());
        assert!(!printed.contains("Bearer s"));
        assert!(!printed.contains("skey"));
        assert!(printed.contains("sid"));
    }
}
