//! Fakes shared by the dispatch tests.

use chrono::{DateTime, Utc};
use qad_core::clock::ManualClock;
use qad_core::collab::{AnswerExtractor, InferenceBackend};
use qad_core::task::{CallOutcome, Prompt, Task};
use qad_core::types::{Category, PerTier, Tier};
use qad_scheduler::QuotaPolicy;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::dispatcher::DispatchOptions;
use crate::retry::BackoffPolicy;

pub(crate) fn start() -> DateTime<Utc> {
    "2025-04-01T00:00:00Z".parse().unwrap()
}

pub(crate) fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(start()))
}

/// Task whose user prompt is its id, so fakes can tell tasks apart.
pub(crate) fn task(id: &str, tier: Tier) -> Task {
    Task::new(
        id,
        Category::Factual,
        tier,
        Prompt {
            system: "system".to_string(),
            user: id.to_string(),
        },
        4,
    )
}

pub(crate) fn tasks(prefix: &str, count: usize, tier: Tier) -> Vec<Task> {
    (0..count)
        .map(|i| task(&format!("{prefix}{i}"), tier))
        .collect()
}

pub(crate) fn quota(hourly: u32, daily: u32) -> QuotaPolicy {
    QuotaPolicy {
        hourly_quota: hourly,
        daily_quota: daily,
    }
}

pub(crate) fn options(cache_dir: &Path, hourly: u32) -> DispatchOptions {
    DispatchOptions {
        quotas: PerTier::new(quota(hourly, hourly * 10), quota(hourly, hourly * 10)),
        min_cooldown: Duration::from_secs(30),
        recheck_interval: Duration::from_secs(7200),
        backoff: BackoffPolicy {
            max_attempts: 2,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
        },
        cache_dir: cache_dir.to_path_buf(),
    }
}

type Script = dyn Fn(Tier, &str, usize) -> CallOutcome + Send + Sync;

/// Backend driven by a closure of `(tier, task id, n-th call on that tier)`.
///
/// Records every call and flags any id invoked while already in a call.
pub(crate) struct ScriptedBackend {
    script: Box<Script>,
    calls: Mutex<Vec<(Tier, String)>>,
    active: Mutex<HashSet<String>>,
    overlap: AtomicBool,
}

impl ScriptedBackend {
    pub fn new(script: impl Fn(Tier, &str, usize) -> CallOutcome + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
            active: Mutex::new(HashSet::new()),
            overlap: AtomicBool::new(false),
        }
    }

    /// Always answers `B`.
    pub fn answering() -> Self {
        Self::new(|_, _, _| CallOutcome::Success("Đáp án: B".to_string()))
    }

    pub fn calls(&self) -> Vec<(Tier, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, tier: Tier) -> usize {
        self.calls().iter().filter(|(t, _)| *t == tier).count()
    }

    pub fn saw_overlap(&self) -> bool {
        self.overlap.load(Ordering::SeqCst)
    }
}

impl InferenceBackend for ScriptedBackend {
    fn invoke(&self, tier: Tier, prompt: &Prompt) -> CallOutcome {
        let id = prompt.user.clone();
        if !self.active.lock().unwrap().insert(id.clone()) {
            self.overlap.store(true, Ordering::SeqCst);
        }
        let nth = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((tier, id.clone()));
            calls.iter().filter(|(t, _)| *t == tier).count()
        };
        std::thread::sleep(Duration::from_millis(1));
        let outcome = (self.script)(tier, &id, nth);
        self.active.lock().unwrap().remove(&id);
        outcome
    }
}

/// Last uppercase letter within the choice range, else `A`.
pub(crate) struct LastLetterExtractor;

impl AnswerExtractor for LastLetterExtractor {
    fn extract(&self, raw: &str, choice_count: usize) -> char {
        raw.chars()
            .rev()
            .find(|c| c.is_ascii_uppercase() && ((*c as u8 - b'A') as usize) < choice_count)
            .unwrap_or('A')
    }
}
