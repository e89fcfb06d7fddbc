//! Tier worker pools.
//!
//! A pool is `concurrency` scoped OS threads ("slots") for one tier. Each
//! slot pulls a task, reserves quota, calls the backend on its own thread and
//! reports exactly one [`SlotEvent`] per task it pulled. Slots share nothing
//! with each other; all coordination goes through the [`TaskSource`].

use anyhow::{Context, Result, anyhow};
use qad_core::clock::Clock;
use qad_core::collab::{AnswerExtractor, InferenceBackend};
use qad_core::task::CallOutcome;
use qad_core::types::Tier;
use qad_scheduler::{RateLimitTracker, Reservation};
use std::thread::{self, Scope, ScopedJoinHandle};
use tracing::{debug, warn};

use crate::retry::BackoffPolicy;
use crate::state::{QueuedTask, SlotEvent};

/// Where slots get work and report outcomes.
pub(crate) trait TaskSource: Sync {
    /// Block until a task for `tier` is available; None once dispatch is over.
    fn next_task(&self, tier: Tier) -> Option<QueuedTask>;
    fn report(&self, event: SlotEvent);
    /// Stop pulls for `tier`; in-flight calls are not touched.
    fn pause_tier(&self, tier: Tier);
    fn resume_tier(&self, tier: Tier);
}

/// What a slot needs to execute a task.
pub(crate) struct SlotContext<'a> {
    pub backend: &'a dyn InferenceBackend,
    pub extractor: &'a dyn AnswerExtractor,
    pub tracker: &'a RateLimitTracker,
    pub clock: &'a dyn Clock,
    pub backoff: BackoffPolicy,
}

impl SlotContext<'_> {
    /// Run one task on `tier` until it completes, needs requeueing or has
    /// exhausted its local retries.
    ///
    /// Retries resume from the task's per-tier count, so a task handed back
    /// after a quota denial only gets what is left of its budget.
    pub fn execute(&self, tier: Tier, mut queued: QueuedTask) -> SlotEvent {
        loop {
            let spent = queued.tier_attempts[tier];
            if spent >= self.backoff.max_attempts {
                let last_error = queued
                    .last_error
                    .take()
                    .unwrap_or_else(|| format!("no retries left on tier '{tier}'"));
                return SlotEvent::Exhausted {
                    task: queued,
                    tier,
                    last_error,
                };
            }
            if self.tracker.try_reserve(tier) == Reservation::Denied {
                return SlotEvent::Denied { task: queued, tier };
            }
            let attempt = spent + 1;
            queued.tier_attempts[tier] = attempt;
            queued.attempts += 1;

            let outcome = self.backend.invoke(tier, &queued.task.prompt);
            if let Some(err) = outcome.as_error(tier) {
                debug!(id = %queued.task.id, attempt, error = %err, "Backend call failed");
            }
            match outcome {
                CallOutcome::Success(raw) => {
                    let answer = self.extractor.extract(&raw, queued.task.choice_count);
                    return SlotEvent::Completed {
                        task: queued,
                        tier,
                        answer,
                        raw_responses: vec![raw],
                    };
                }
                CallOutcome::RateLimited => {
                    self.tracker.record_rate_limit_signal(tier);
                    return SlotEvent::RateLimited { task: queued, tier };
                }
                CallOutcome::ContentFiltered(message) => {
                    let answer = queued.task.fallback_answer;
                    warn!(
                        id = %queued.task.id,
                        tier = %tier,
                        answer = %answer,
                        "Content filtered; using designated safe answer"
                    );
                    return SlotEvent::Completed {
                        task: queued,
                        tier,
                        answer,
                        raw_responses: vec![format!("[content filtered] {message}")],
                    };
                }
                CallOutcome::TransientError(message) => {
                    if attempt >= self.backoff.max_attempts {
                        return SlotEvent::Exhausted {
                            task: queued,
                            tier,
                            last_error: message,
                        };
                    }
                    let delay = self.backoff.delay_for(attempt);
                    warn!(
                        id = %queued.task.id,
                        tier = %tier,
                        attempt,
                        max_attempts = self.backoff.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "Transient error; backing off"
                    );
                    queued.last_error = Some(message);
                    thread::sleep(self.clock.elapse(delay));
                }
            }
        }
    }
}

fn run_slot<S: TaskSource>(tier: Tier, index: usize, source: &S, ctx: &SlotContext<'_>) {
    debug!(tier = %tier, slot = index, "Slot started");
    while let Some(queued) = source.next_task(tier) {
        let event = ctx.execute(tier, queued);
        source.report(event);
    }
    debug!(tier = %tier, slot = index, "Slot finished");
}

/// Slots for one tier.
pub(crate) struct TierWorkerPool<'scope, S: TaskSource> {
    tier: Tier,
    source: &'scope S,
    handles: Vec<ScopedJoinHandle<'scope, ()>>,
}

impl<'scope, S: TaskSource> TierWorkerPool<'scope, S> {
    /// Spawn exactly `concurrency` slots for `tier`.
    ///
    /// On a spawn failure the already-spawned slots keep running; the caller
    /// must end dispatch and [`Self::drain`] whatever was returned before.
    pub fn start<'env>(
        scope: &'scope Scope<'scope, 'env>,
        tier: Tier,
        concurrency: usize,
        source: &'scope S,
        ctx: &'scope SlotContext<'scope>,
    ) -> (Self, Result<()>) {
        let mut pool = Self {
            tier,
            source,
            handles: Vec::with_capacity(concurrency),
        };
        for index in 0..concurrency {
            let spawned = thread::Builder::new()
                .name(format!("qad-{tier}-{index}"))
                .spawn_scoped(scope, move || run_slot(tier, index, source, ctx))
                .with_context(|| format!("Failed to spawn slot {index} for tier '{tier}'"));
            match spawned {
                Ok(handle) => pool.handles.push(handle),
                Err(err) => return (pool, Err(err)),
            }
        }
        (pool, Ok(()))
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Stop pulling new tasks; in-flight calls finish normally.
    pub fn pause(&self) {
        self.source.pause_tier(self.tier);
    }

    pub fn resume(&self) {
        self.source.resume_tier(self.tier);
    }

    /// Join every slot. Returns once the source has ended dispatch.
    pub fn drain(self) -> Result<()> {
        let tier = self.tier;
        let mut panicked = 0usize;
        for handle in self.handles {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            return Err(anyhow!("{panicked} slot(s) for tier '{tier}' panicked"));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
