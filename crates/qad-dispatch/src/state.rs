//! Dispatcher-owned state and the single completion handler.
//!
//! Everything here is mutated under the dispatcher's one mutex. Slots never
//! touch queues, tier statuses or the cache directly; they send a
//! [`SlotEvent`] and [`DispatchState::handle`] applies it.

use chrono::{DateTime, Utc};
use qad_cache::ResultCache;
use qad_core::error::AppError;
use qad_core::task::{CacheEntry, FailureReason, Task, TaskId, TaskResult, TaskState};
use qad_core::types::{PerTier, Tier};
use qad_scheduler::{ExhaustedAction, RateLimitTracker, TierStatus, decide_exhausted, should_fallback};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet, VecDeque};
use tracing::{debug, error, info, warn};

use crate::report::RunStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Initializing,
    Running,
    WaitingForQuota,
    Completed,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::WaitingForQuota => "waiting_for_quota",
            Self::Completed => "completed",
        };
        write!(f, "{name}")
    }
}

/// A task plus its dispatch history.
#[derive(Debug, Clone)]
pub(crate) struct QueuedTask {
    pub task: Task,
    /// Tiers whose local retries this task has exhausted.
    pub tiers_tried: Vec<Tier>,
    /// Backend calls made for this task, across tiers.
    pub attempts: u32,
    /// Local retry budget spent per tier. Survives requeues, so a quota
    /// denial in the middle of retries does not reset it.
    pub tier_attempts: PerTier<u32>,
    pub last_error: Option<String>,
}

impl QueuedTask {
    pub fn new(task: Task) -> Self {
        Self {
            task,
            tiers_tried: Vec::new(),
            attempts: 0,
            tier_attempts: PerTier::default(),
            last_error: None,
        }
    }
}

/// Outcome a slot reports for the task it held.
#[derive(Debug)]
pub(crate) enum SlotEvent {
    Completed {
        task: QueuedTask,
        tier: Tier,
        answer: char,
        raw_responses: Vec<String>,
    },
    RateLimited {
        task: QueuedTask,
        tier: Tier,
    },
    Denied {
        task: QueuedTask,
        tier: Tier,
    },
    Exhausted {
        task: QueuedTask,
        tier: Tier,
        last_error: String,
    },
}

pub(crate) struct DispatchState {
    pub phase: Phase,
    pub queues: PerTier<VecDeque<QueuedTask>>,
    pub tiers: PerTier<TierStatus>,
    pub in_flight: HashSet<TaskId>,
    pub cache: ResultCache,
    pub results: BTreeMap<TaskId, TaskResult>,
    pub stats: RunStats,
}

impl DispatchState {
    /// Build queues from `tasks`, skipping ids already in `cache`.
    ///
    /// Cached completions still inside the daily window are replayed into
    /// `tracker`, so a resumed run respects quota the previous run spent.
    pub fn initialize(tasks: Vec<Task>, cache: ResultCache, tracker: &RateLimitTracker) -> Self {
        for entry in cache.entries().values() {
            tracker.record_call(entry.tier_used, entry.completed_at);
        }

        let mut state = Self {
            phase: Phase::Initializing,
            queues: PerTier::default(),
            tiers: PerTier::default(),
            in_flight: HashSet::new(),
            cache,
            results: BTreeMap::new(),
            stats: RunStats::default(),
        };

        let mut seen: HashSet<TaskId> = HashSet::new();
        for mut task in tasks {
            if !seen.insert(task.id.clone()) {
                warn!(id = %task.id, "Duplicate task id; keeping the first occurrence");
                state.stats.duplicates += 1;
                continue;
            }
            state.stats.total += 1;
            if let Some(entry) = state.cache.get(&task.id) {
                state
                    .results
                    .insert(task.id.clone(), TaskResult::Resolved(entry.clone()));
                state.stats.from_cache += 1;
                continue;
            }
            task.state = TaskState::Pending;
            let tier = task.preferred_tier;
            state.tiers[tier].pending += 1;
            state.queues[tier].push_back(QueuedTask::new(task));
        }

        info!(
            total = state.stats.total,
            cached = state.stats.from_cache,
            duplicates = state.stats.duplicates,
            small = state.tiers.small.pending,
            large = state.tiers.large.pending,
            "Dispatch initialized"
        );

        if state.is_drained() {
            state.set_phase(Phase::Completed);
        }
        state
    }

    pub fn is_drained(&self) -> bool {
        self.queues.small.is_empty() && self.queues.large.is_empty() && self.in_flight.is_empty()
    }

    pub fn has_queued(&self) -> bool {
        !(self.queues.small.is_empty() && self.queues.large.is_empty())
    }

    pub fn set_phase(&mut self, next: Phase) {
        if self.phase == next || self.phase == Phase::Completed {
            return;
        }
        info!(from = %self.phase, to = %next, "Dispatcher phase change");
        if next == Phase::WaitingForQuota {
            self.stats.quota_waits += 1;
        }
        self.phase = next;
    }

    /// Pop the next task for `tier` if the tier may pull work now.
    pub fn take_next(&mut self, tier: Tier) -> Option<QueuedTask> {
        if self.phase != Phase::Running || self.tiers[tier].paused {
            return None;
        }
        let mut queued = self.queues[tier].pop_front()?;
        queued.task.state = TaskState::InFlight;
        let fresh = self.in_flight.insert(queued.task.id.clone());
        debug_assert!(fresh, "task {} handed to two slots", queued.task.id);
        Some(queued)
    }

    fn release(&mut self, id: &str) {
        let held = self.in_flight.remove(id);
        debug_assert!(held, "event for task {id} that was not in flight");
    }

    fn finish(&mut self, tier: Tier) {
        self.tiers[tier].pending = self.tiers[tier].pending.saturating_sub(1);
    }

    /// Apply one slot event. The only place results and cache are written.
    pub fn handle(&mut self, event: SlotEvent, tracker: &RateLimitTracker, now: DateTime<Utc>) {
        match event {
            SlotEvent::Completed {
                mut task,
                tier,
                answer,
                raw_responses,
            } => {
                self.release(&task.task.id);
                task.task.state = TaskState::Completed;
                let entry = CacheEntry {
                    id: task.task.id.clone(),
                    answer,
                    tier_used: tier,
                    category: task.task.category,
                    raw_responses,
                    completed_at: now,
                };
                if let Err(err) = self.cache.put(entry.clone()) {
                    error!(
                        id = %entry.id,
                        error = %format!("{err:#}"),
                        "Failed to persist result; kept for this run only"
                    );
                    self.stats.unpersisted += 1;
                }
                self.finish(tier);
                self.stats.completed[tier] += 1;
                info!(
                    id = %entry.id,
                    tier = %tier,
                    answer = %answer,
                    attempts = task.attempts,
                    "Task completed"
                );
                self.results.insert(entry.id.clone(), TaskResult::Resolved(entry));
            }
            SlotEvent::RateLimited { mut task, tier } => {
                self.release(&task.task.id);
                task.task.state = TaskState::Pending;
                self.queues[tier].push_front(task);
                self.stats.rate_limited += 1;
                self.pause_tier(tier, tracker);
            }
            SlotEvent::Denied { mut task, tier } => {
                self.release(&task.task.id);
                task.task.state = TaskState::Pending;
                self.queues[tier].push_front(task);
                self.stats.denied += 1;
                self.pause_tier(tier, tracker);
            }
            SlotEvent::Exhausted {
                mut task,
                tier,
                last_error,
            } => {
                self.release(&task.task.id);
                if !task.tiers_tried.contains(&tier) {
                    task.tiers_tried.push(tier);
                }
                match decide_exhausted(tier, &task.tiers_tried, &self.tiers) {
                    ExhaustedAction::RetryOn { tier: next } => {
                        info!(
                            id = %task.task.id,
                            failed = %tier,
                            new = %next,
                            error = %last_error,
                            "Retries exhausted; trying the other tier"
                        );
                        self.finish(tier);
                        self.tiers[next].pending += 1;
                        task.task.state = TaskState::Pending;
                        self.queues[next].push_back(task);
                        self.stats.escalated += 1;
                    }
                    ExhaustedAction::Fail { reason } => {
                        task.task.state = TaskState::Failed;
                        self.finish(tier);
                        self.stats.failed += 1;
                        let failure = FailureReason {
                            tiers_tried: task.tiers_tried,
                            attempts: task.attempts,
                            last_error,
                        };
                        let err = AppError::PermanentFailure {
                            id: task.task.id.clone(),
                            reason: failure.to_string(),
                        };
                        error!(error = %err, decision = %reason, "Task failed");
                        self.results
                            .insert(task.task.id, TaskResult::Failed(failure));
                    }
                }
            }
        }

        if self.is_drained() {
            self.set_phase(Phase::Completed);
        }
    }

    /// Mark `tier` paused and move its queued work if fallback allows.
    pub fn pause_tier(&mut self, tier: Tier, tracker: &RateLimitTracker) {
        if !self.tiers[tier].paused {
            self.tiers[tier].paused = true;
            warn!(
                tier = %tier,
                pending = self.tiers[tier].pending,
                wait_secs = tracker.time_until_capacity(tier).as_secs(),
                "Tier paused"
            );
        }
        self.reroute_from(tier);
    }

    /// Clear the pause on `tier`, then give a still-paused other tier the
    /// chance to hand its queue over.
    pub fn resume_tier(&mut self, tier: Tier) {
        if !self.tiers[tier].paused {
            return;
        }
        self.tiers[tier].paused = false;
        info!(tier = %tier, pending = self.tiers[tier].pending, "Tier resumed");
        let other = tier.other();
        if self.tiers[other].paused {
            self.reroute_from(other);
        }
    }

    /// Move every queued task off `source` if the fallback table allows it.
    /// In-flight tasks stay where they are.
    pub fn reroute_from(&mut self, source: Tier) -> usize {
        let target = source.other();
        if !should_fallback(source, target, &self.tiers) {
            return 0;
        }
        let moved: Vec<QueuedTask> = self.queues[source].drain(..).collect();
        let count = moved.len();
        if count == 0 {
            return 0;
        }
        self.queues[target].extend(moved);
        self.tiers[source].pending = self.tiers[source].pending.saturating_sub(count);
        self.tiers[target].pending += count;
        self.stats.rerouted += count;
        info!(from = %source, to = %target, moved = count, "Re-routed queued tasks");
        debug!(
            small_pending = self.tiers.small.pending,
            large_pending = self.tiers.large.pending,
            "Pending after re-route"
        );
        count
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
