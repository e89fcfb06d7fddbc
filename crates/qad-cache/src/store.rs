use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use qad_core::error::AppError;
use qad_core::task::{CacheEntry, TaskId};
use qad_core::types::{Category, Tier};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::io::{quarantine_corrupt, sibling_path, tmp_path, write_json_atomic};
use crate::lock::CacheLock;

pub const CACHE_FILE_PREFIX: &str = "answer_cache_";
const CACHE_FILE_SUFFIX: &str = ".json";

/// On-disk layout of one cache version.
#[derive(Debug, Deserialize)]
struct CacheSnapshot {
    version: String,
    #[serde(default)]
    count: usize,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    answers: BTreeMap<TaskId, CacheEntry>,
}

#[derive(Serialize)]
struct CacheSnapshotRef<'a> {
    version: &'a str,
    count: usize,
    updated_at: DateTime<Utc>,
    answers: &'a BTreeMap<TaskId, CacheEntry>,
}

/// Summary of one cache version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub version: String,
    pub count: usize,
    pub by_tier: BTreeMap<Tier, usize>,
    pub by_category: BTreeMap<Category, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_completed_at: Option<DateTime<Utc>>,
}

impl CacheStats {
    pub fn from_entries<'a>(
        version: &str,
        entries: impl IntoIterator<Item = &'a CacheEntry>,
    ) -> Self {
        let mut stats = Self {
            version: version.to_string(),
            count: 0,
            by_tier: BTreeMap::new(),
            by_category: BTreeMap::new(),
            last_completed_at: None,
        };
        for entry in entries {
            stats.count += 1;
            *stats.by_tier.entry(entry.tier_used).or_default() += 1;
            *stats.by_category.entry(entry.category).or_default() += 1;
            stats.last_completed_at = stats.last_completed_at.max(Some(entry.completed_at));
        }
        stats
    }
}

/// Reject version tags that could escape the cache directory or confuse
/// the file naming scheme.
pub fn validate_version(version: &str) -> std::result::Result<(), AppError> {
    let valid = !version.is_empty()
        && version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(AppError::InvalidCacheVersion(version.to_string()))
    }
}

/// `<dir>/answer_cache_<version>.json`
pub fn cache_file_path(dir: &Path, version: &str) -> PathBuf {
    dir.join(format!("{CACHE_FILE_PREFIX}{version}{CACHE_FILE_SUFFIX}"))
}

/// Version tags with a snapshot in `dir`, sorted. A missing dir has none.
pub fn list_versions(dir: &Path) -> Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut versions = Vec::new();
    for entry in fs::read_dir(dir)
        .with_context(|| format!("Failed to read cache directory: {}", dir.display()))?
    {
        let entry = entry
            .with_context(|| format!("Failed to read cache directory: {}", dir.display()))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(version) = name
            .strip_prefix(CACHE_FILE_PREFIX)
            .and_then(|rest| rest.strip_suffix(CACHE_FILE_SUFFIX))
            && validate_version(version).is_ok()
        {
            versions.push(version.to_string());
        }
    }
    versions.sort();
    Ok(versions)
}

fn read_snapshot(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("Failed to read cache: {}", path.display()))
}

/// Decode snapshot bytes. Errors here mean the file itself is corrupt.
fn decode_snapshot(
    raw: &[u8],
    path: &Path,
    version: &str,
) -> Result<BTreeMap<TaskId, CacheEntry>> {
    let snapshot: CacheSnapshot = serde_json::from_slice(raw)
        .with_context(|| format!("Failed to parse cache: {}", path.display()))?;

    if snapshot.version != version {
        warn!(
            path = %path.display(),
            expected = version,
            found = %snapshot.version,
            "Cache snapshot version tag does not match file name"
        );
    }
    if snapshot.count != snapshot.answers.len() {
        warn!(
            path = %path.display(),
            count = snapshot.count,
            entries = snapshot.answers.len(),
            "Cache snapshot count mismatch; trusting entries"
        );
    }
    debug!(path = %path.display(), updated_at = ?snapshot.updated_at, "Loaded cache snapshot");

    let mut answers = snapshot.answers;
    answers.retain(|key, entry| {
        let consistent = *key == entry.id;
        if !consistent {
            warn!(key = %key, id = %entry.id, "Dropping cache entry keyed under a different id");
        }
        consistent
    });
    Ok(answers)
}

/// Read a version's entries without locking or repairing anything.
///
/// For inspection commands that may run while a dispatch holds the lock.
pub fn read_entries(dir: &Path, version: &str) -> Result<BTreeMap<TaskId, CacheEntry>> {
    validate_version(version)?;
    let path = cache_file_path(dir, version);
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    decode_snapshot(&read_snapshot(&path)?, &path, version)
}

/// Durable record of resolved tasks for one version tag.
///
/// Entries are immutable: each id is written once. Every [`ResultCache::put`]
/// rewrites the full snapshot atomically, so a crash at any point leaves the
/// previous or the new snapshot on disk.
#[derive(Debug)]
pub struct ResultCache {
    version: String,
    path: PathBuf,
    entries: BTreeMap<TaskId, CacheEntry>,
    _lock: CacheLock,
}

impl ResultCache {
    /// Open (or create) the cache for `version` under `dir`.
    ///
    /// A snapshot that cannot be decoded is moved to `<file>.corrupt` (or the
    /// next free `.corrupt.N`) and the cache starts empty. A snapshot that
    /// cannot be read is a setup error and stays where it is. A leftover
    /// `<file>.tmp` from an interrupted write is discarded.
    pub fn open(dir: &Path, version: &str) -> Result<Self> {
        validate_version(version)?;
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create cache directory: {}", dir.display()))?;

        let path = cache_file_path(dir, version);
        let lock = CacheLock::acquire(&sibling_path(&path, ".lock"), version)?;

        let tmp = tmp_path(&path);
        if tmp.exists() {
            warn!(path = %tmp.display(), "Discarding partial cache write from interrupted run");
            fs::remove_file(&tmp)
                .with_context(|| format!("Failed to remove stale temp file: {}", tmp.display()))?;
        }

        let entries = if path.exists() {
            let raw = read_snapshot(&path)?;
            match decode_snapshot(&raw, &path, version) {
                Ok(entries) => entries,
                Err(error) => {
                    quarantine_corrupt(&path, &error)?;
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        info!(
            version,
            path = %path.display(),
            entries = entries.len(),
            "Opened result cache"
        );
        Ok(Self {
            version: version.to_string(),
            path,
            entries,
            _lock: lock,
        })
    }

    /// Ids already resolved in this version.
    pub fn load(&self) -> BTreeSet<TaskId> {
        self.entries.keys().cloned().collect()
    }

    pub fn has(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&CacheEntry> {
        self.entries.get(id)
    }

    pub fn entries(&self) -> &BTreeMap<TaskId, CacheEntry> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a new entry and persist the snapshot before returning.
    ///
    /// Rejects an id that is already present. If persisting fails the entry
    /// is not kept, so memory never runs ahead of disk.
    pub fn put(&mut self, entry: CacheEntry) -> Result<()> {
        if self.entries.contains_key(&entry.id) {
            return Err(AppError::CacheEntryExists(entry.id).into());
        }
        let id = entry.id.clone();
        self.entries.insert(id.clone(), entry);
        if let Err(error) = self.flush() {
            self.entries.remove(&id);
            return Err(error);
        }
        Ok(())
    }

    /// Rewrite the snapshot from memory.
    pub fn flush(&self) -> Result<()> {
        let snapshot = CacheSnapshotRef {
            version: &self.version,
            count: self.entries.len(),
            updated_at: Utc::now(),
            answers: &self.entries,
        };
        write_json_atomic(&self.path, &snapshot)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats::from_entries(&self.version, self.entries.values())
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
