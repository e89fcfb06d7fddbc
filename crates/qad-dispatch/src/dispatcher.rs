//! Dispatcher: owns the queues, drives both worker pools and waits out quota
//! exhaustion.
//!
//! Phases run `Initializing -> Running <-> WaitingForQuota -> Completed`.
//! Slots block on one condition variable shared with the supervisor, which is
//! the calling thread of [`Dispatcher::run`].

use anyhow::{Context, Result, bail};
use qad_config::DispatchConfig;
use qad_core::clock::{Clock, SystemClock};
use qad_core::collab::{AnswerExtractor, InferenceBackend};
use qad_core::error::AppError;
use qad_core::task::Task;
use qad_core::types::{PerTier, Tier};
use qad_cache::ResultCache;
use qad_scheduler::{QuotaPolicy, RateLimitTracker};
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::pool::{SlotContext, TaskSource, TierWorkerPool};
use crate::report::RunReport;
use crate::retry::BackoffPolicy;
use crate::state::{DispatchState, Phase, QueuedTask, SlotEvent};

/// Everything [`Dispatcher::run`] needs besides the tasks themselves.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub quotas: PerTier<QuotaPolicy>,
    /// Shortest pause after a rate-limit signal.
    pub min_cooldown: Duration,
    /// Upper bound on any single supervisor wait.
    pub recheck_interval: Duration,
    pub backoff: BackoffPolicy,
    pub cache_dir: PathBuf,
}

impl DispatchOptions {
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            quotas: PerTier::from_fn(|tier| {
                let tier = config.tiers.get(tier);
                QuotaPolicy {
                    hourly_quota: tier.hourly_quota,
                    daily_quota: tier.daily_quota,
                }
            }),
            min_cooldown: config.wait.min_cooldown(),
            recheck_interval: config.wait.recheck_interval(),
            backoff: BackoffPolicy::from_config(&config.retry),
            cache_dir: config.cache.dir.clone(),
        }
    }
}

pub struct Dispatcher {
    options: DispatchOptions,
    backend: Arc<dyn InferenceBackend>,
    extractor: Arc<dyn AnswerExtractor>,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    pub fn new(
        options: DispatchOptions,
        backend: Arc<dyn InferenceBackend>,
        extractor: Arc<dyn AnswerExtractor>,
    ) -> Self {
        Self {
            options,
            backend,
            extractor,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the wall clock, e.g. with a manual clock in tests.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn options(&self) -> &DispatchOptions {
        &self.options
    }

    /// Resolve every task, skipping ids already cached under `cache_version`.
    ///
    /// Returns one result per distinct input id. Individual task failures are
    /// reported as [`qad_core::task::TaskResult::Failed`]; `Err` means the run
    /// could not be set up.
    pub fn run(
        &self,
        tasks: Vec<Task>,
        cache_version: &str,
        small_concurrency: usize,
        large_concurrency: usize,
    ) -> Result<RunReport> {
        let concurrency = PerTier::new(small_concurrency, large_concurrency);
        for tier in Tier::ALL {
            if concurrency[tier] == 0 {
                bail!("Concurrency for tier '{tier}' must be at least 1");
            }
            let quota = self.options.quotas[tier];
            if quota.hourly_quota == 0 || quota.daily_quota == 0 {
                bail!(
                    "Quota for tier '{tier}' must allow at least one call (hourly {}, daily {})",
                    quota.hourly_quota,
                    quota.daily_quota
                );
            }
        }

        let cache = ResultCache::open(&self.options.cache_dir, cache_version).with_context(|| {
            format!(
                "Failed to open result cache '{}' in {}",
                cache_version,
                self.options.cache_dir.display()
            )
        })?;
        let tracker = RateLimitTracker::new(
            self.options.quotas,
            self.options.min_cooldown,
            Arc::clone(&self.clock),
        );
        let state = DispatchState::initialize(tasks, cache, &tracker);

        let core = DispatchCore {
            state: Mutex::new(state),
            wake: Condvar::new(),
            tracker,
            clock: self.clock.as_ref(),
        };

        if core.lock().phase == Phase::Completed {
            info!("Nothing to dispatch; every task is already cached");
        } else {
            self.dispatch(&core, concurrency)?;
        }

        for tier in Tier::ALL {
            let snapshot = core.tracker.snapshot(tier);
            debug!(
                tier = %tier,
                hourly_used = snapshot.hourly_used,
                daily_used = snapshot.daily_used,
                "Quota usage at end of run"
            );
        }

        let state = core.state.into_inner().unwrap_or_else(PoisonError::into_inner);
        let report = RunReport {
            results: state.results,
            stats: state.stats,
        };
        info!(
            total = report.stats.total,
            cached = report.stats.from_cache,
            small = report.stats.completed.small,
            large = report.stats.completed.large,
            failed = report.stats.failed,
            rerouted = report.stats.rerouted,
            quota_waits = report.stats.quota_waits,
            "Dispatch finished"
        );
        Ok(report)
    }

    fn dispatch(&self, core: &DispatchCore<'_>, concurrency: PerTier<usize>) -> Result<()> {
        let ctx = SlotContext {
            backend: self.backend.as_ref(),
            extractor: self.extractor.as_ref(),
            tracker: &core.tracker,
            clock: self.clock.as_ref(),
            backoff: self.options.backoff,
        };
        let recheck = self.options.recheck_interval;

        thread::scope(|scope| {
            let mut pools = Vec::with_capacity(Tier::ALL.len());
            for tier in Tier::ALL {
                let (pool, started) =
                    TierWorkerPool::start(scope, tier, concurrency[tier], core, &ctx);
                info!(tier = %pool.tier(), slots = pool.len(), "Worker pool started");
                pools.push(pool);
                if let Err(err) = started {
                    core.abort();
                    for pool in pools {
                        if let Err(join_err) = pool.drain() {
                            error!(error = %format!("{join_err:#}"), "Slot failure during abort");
                        }
                    }
                    return Err(err);
                }
            }

            // Quota already spent by a previous run keeps a tier paused from
            // the start.
            for pool in &pools {
                if core.tracker.is_paused(pool.tier()) {
                    pool.pause();
                }
            }
            core.begin();
            core.supervise(&pools, recheck);

            let mut outcome = Ok(());
            for pool in pools {
                if let Err(err) = pool.drain() {
                    error!(error = %format!("{err:#}"), "Worker pool failed");
                    if outcome.is_ok() {
                        outcome = Err(err);
                    }
                }
            }
            outcome
        })
    }
}

/// State shared by the supervisor and every slot of a run.
struct DispatchCore<'a> {
    state: Mutex<DispatchState>,
    wake: Condvar,
    tracker: RateLimitTracker,
    clock: &'a dyn Clock,
}

impl DispatchCore<'_> {
    fn lock(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self) {
        self.lock().set_phase(Phase::Running);
        self.wake.notify_all();
    }

    /// End dispatch without draining the queues.
    fn abort(&self) {
        let mut state = self.lock();
        warn!(
            queued = state.queues.small.len() + state.queues.large.len(),
            in_flight = state.in_flight.len(),
            "Aborting dispatch"
        );
        state.set_phase(Phase::Completed);
        drop(state);
        self.wake.notify_all();
    }

    /// Resume tiers as capacity returns, until the state reaches Completed.
    fn supervise(&self, pools: &[TierWorkerPool<'_, Self>], recheck: Duration) {
        let mut state = self.lock();
        loop {
            if state.phase == Phase::Completed {
                return;
            }

            let paused: Vec<Tier> = Tier::ALL
                .into_iter()
                .filter(|tier| state.tiers[*tier].paused)
                .collect();
            if paused.is_empty() {
                state = self.wake.wait(state).unwrap_or_else(PoisonError::into_inner);
                continue;
            }

            let ready: Vec<Tier> = paused
                .iter()
                .copied()
                .filter(|tier| self.tracker.time_until_capacity(*tier).is_zero())
                .collect();
            if !ready.is_empty() {
                drop(state);
                for pool in pools.iter().filter(|pool| ready.contains(&pool.tier())) {
                    pool.resume();
                }
                state = self.lock();
                continue;
            }

            let waits = paused.iter().map(|tier| self.tracker.time_until_capacity(*tier));
            let exhausted = paused.len() == Tier::ALL.len() && state.has_queued();
            let wait = if exhausted {
                waits.max()
            } else {
                waits.min()
            }
            .unwrap_or(recheck)
            .min(recheck);

            if exhausted && state.phase != Phase::WaitingForQuota {
                let err = AppError::Exhausted {
                    wait_secs: wait.as_secs(),
                };
                warn!(error = %err, "Waiting for quota");
                state.set_phase(Phase::WaitingForQuota);
            }

            debug!(wait_ms = wait.as_millis() as u64, paused = ?paused, "Supervisor waiting");
            let block = self.clock.elapse(wait);
            if block.is_zero() {
                continue;
            }
            let (guard, _) = self
                .wake
                .wait_timeout(state, block)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }
}

impl TaskSource for DispatchCore<'_> {
    fn next_task(&self, tier: Tier) -> Option<QueuedTask> {
        let mut state = self.lock();
        loop {
            if state.phase == Phase::Completed {
                return None;
            }
            if let Some(queued) = state.take_next(tier) {
                return Some(queued);
            }
            state = self.wake.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn report(&self, event: SlotEvent) {
        let mut state = self.lock();
        state.handle(event, &self.tracker, self.clock.now());
        drop(state);
        self.wake.notify_all();
    }

    fn pause_tier(&self, tier: Tier) {
        self.lock().pause_tier(tier, &self.tracker);
        self.wake.notify_all();
    }

    fn resume_tier(&self, tier: Tier) {
        let mut state = self.lock();
        state.resume_tier(tier);
        if state.phase == Phase::WaitingForQuota {
            state.set_phase(Phase::Running);
        }
        drop(state);
        self.wake.notify_all();
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
