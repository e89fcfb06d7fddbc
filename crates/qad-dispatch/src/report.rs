use qad_core::task::{CacheEntry, FailureReason, TaskId, TaskResult};
use qad_core::types::PerTier;
use serde::Serialize;
use std::collections::BTreeMap;

/// Counters collected over one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    /// Distinct input ids.
    pub total: usize,
    /// Input ids dropped because they repeated an earlier id.
    pub duplicates: usize,
    /// Resolved from a previous run without any backend call.
    pub from_cache: usize,
    /// Resolved in this run, by the tier that produced the answer.
    pub completed: PerTier<usize>,
    pub failed: usize,
    /// Queued tasks moved to the other tier by fallback.
    pub rerouted: usize,
    /// Tasks retried on the other tier after exhausting local retries.
    pub escalated: usize,
    pub rate_limited: usize,
    pub denied: usize,
    /// Times the dispatcher entered WaitingForQuota.
    pub quota_waits: usize,
    /// Completions that could not be written to the cache.
    pub unpersisted: usize,
}

/// Outcome of [`crate::Dispatcher::run`]: one result per distinct input id.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub results: BTreeMap<TaskId, TaskResult>,
    pub stats: RunStats,
}

impl RunReport {
    pub fn get(&self, id: &str) -> Option<&TaskResult> {
        self.results.get(id)
    }

    pub fn answer(&self, id: &str) -> Option<char> {
        self.results
            .get(id)
            .and_then(TaskResult::entry)
            .map(|entry| entry.answer)
    }

    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.results.values().filter_map(TaskResult::entry)
    }

    pub fn failures(&self) -> impl Iterator<Item = (&TaskId, &FailureReason)> {
        self.results.iter().filter_map(|(id, result)| match result {
            TaskResult::Failed(reason) => Some((id, reason)),
            TaskResult::Resolved(_) => None,
        })
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    /// Resolved entries by `tier_used`, cached ones included.
    pub fn tier_split(&self) -> PerTier<usize> {
        let mut split = PerTier::default();
        for entry in self.entries() {
            split[entry.tier_used] += 1;
        }
        split
    }
}
