use super::*;
use crate::state::QueuedTask;
use crate::testing::{LastLetterExtractor, ScriptedBackend, manual_clock, quota, start, task};
use qad_core::types::PerTier;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn tracker(hourly: u32, clock: Arc<qad_core::clock::ManualClock>) -> RateLimitTracker {
    RateLimitTracker::new(
        PerTier::new(quota(hourly, 1000), quota(hourly, 1000)),
        Duration::from_secs(30),
        clock,
    )
}

fn backoff(max_attempts: u32) -> BackoffPolicy {
    BackoffPolicy {
        max_attempts,
        base_delay: Duration::from_secs(2),
        max_delay: Duration::from_secs(5),
    }
}

fn queued(id: &str) -> QueuedTask {
    QueuedTask::new(task(id, Tier::Small))
}

/// Hands out a fixed list of tasks, then ends dispatch.
#[derive(Default)]
struct ListSource {
    queue: Mutex<VecDeque<QueuedTask>>,
    events: Mutex<Vec<SlotEvent>>,
    paused: Mutex<Vec<(Tier, bool)>>,
    pulls: AtomicUsize,
}

impl ListSource {
    fn with(ids: &[&str]) -> Self {
        let source = Self::default();
        source
            .queue
            .lock()
            .unwrap()
            .extend(ids.iter().copied().map(queued));
        source
    }
}

impl TaskSource for ListSource {
    fn next_task(&self, _tier: Tier) -> Option<QueuedTask> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        self.queue.lock().unwrap().pop_front()
    }

    fn report(&self, event: SlotEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn pause_tier(&self, tier: Tier) {
        self.paused.lock().unwrap().push((tier, true));
    }

    fn resume_tier(&self, tier: Tier) {
        self.paused.lock().unwrap().push((tier, false));
    }
}

#[test]
fn test_success_extracts_answer() {
    let clock = manual_clock();
    let tracker = tracker(10, Arc::clone(&clock));
    let backend = ScriptedBackend::new(|_, _, _| CallOutcome::Success("Vậy Đáp án: C".to_string()));
    let ctx = SlotContext {
        backend: &backend,
        extractor: &LastLetterExtractor,
        tracker: &tracker,
        clock: &*clock,
        backoff: backoff(3),
    };

    match ctx.execute(Tier::Small, queued("q1")) {
        SlotEvent::Completed {
            task,
            tier,
            answer,
            raw_responses,
        } => {
            assert_eq!(task.attempts, 1);
            assert_eq!(tier, Tier::Small);
            assert_eq!(answer, 'C');
            assert_eq!(raw_responses, vec!["Vậy Đáp án: C"]);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(tracker.snapshot(Tier::Small).hourly_used, 1);
}

#[test]
fn test_denied_reservation_makes_no_call() {
    let clock = manual_clock();
    let tracker = tracker(1, Arc::clone(&clock));
    assert_eq!(tracker.try_reserve(Tier::Large), Reservation::Allowed);
    let backend = ScriptedBackend::answering();
    let ctx = SlotContext {
        backend: &backend,
        extractor: &LastLetterExtractor,
        tracker: &tracker,
        clock: &*clock,
        backoff: backoff(3),
    };

    let event = ctx.execute(Tier::Large, queued("q1"));
    assert!(matches!(event, SlotEvent::Denied { tier: Tier::Large, .. }));
    assert!(backend.calls().is_empty());
}

#[test]
fn test_rate_limited_records_signal() {
    let clock = manual_clock();
    let tracker = tracker(10, Arc::clone(&clock));
    let backend = ScriptedBackend::new(|_, _, _| CallOutcome::RateLimited);
    let ctx = SlotContext {
        backend: &backend,
        extractor: &LastLetterExtractor,
        tracker: &tracker,
        clock: &*clock,
        backoff: backoff(3),
    };

    let event = ctx.execute(Tier::Small, queued("q1"));
    assert!(matches!(event, SlotEvent::RateLimited { .. }));
    assert!(tracker.is_paused(Tier::Small));
    assert_eq!(
        tracker.snapshot(Tier::Small).paused_until,
        Some(start() + chrono::Duration::hours(1))
    );
}

#[test]
fn test_content_filtered_uses_fallback_answer() {
    let clock = manual_clock();
    let tracker = tracker(10, Arc::clone(&clock));
    let backend = ScriptedBackend::new(|_, _, _| CallOutcome::ContentFiltered("blocked".to_string()));
    let ctx = SlotContext {
        backend: &backend,
        extractor: &LastLetterExtractor,
        tracker: &tracker,
        clock: &*clock,
        backoff: backoff(3),
    };
    let mut item = queued("q1");
    item.task = item.task.with_fallback_answer('D');

    match ctx.execute(Tier::Small, item) {
        SlotEvent::Completed {
            answer,
            raw_responses,
            ..
        } => {
            assert_eq!(answer, 'D');
            assert_eq!(raw_responses, vec!["[content filtered] blocked"]);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn test_transient_errors_back_off_then_succeed() {
    let clock = manual_clock();
    let tracker = tracker(10, Arc::clone(&clock));
    let backend = ScriptedBackend::new(|_, _, nth| {
        if nth < 3 {
            CallOutcome::TransientError("HTTP 503".to_string())
        } else {
            CallOutcome::Success("Đáp án: B".to_string())
        }
    });
    let ctx = SlotContext {
        backend: &backend,
        extractor: &LastLetterExtractor,
        tracker: &tracker,
        clock: &*clock,
        backoff: backoff(3),
    };

    match ctx.execute(Tier::Small, queued("q1")) {
        SlotEvent::Completed { task, answer, .. } => {
            assert_eq!(answer, 'B');
            assert_eq!(task.attempts, 3);
        }
        other => panic!("unexpected event {other:?}"),
    }
    // 2s then 4s of backoff, every attempt reserving quota.
    assert_eq!(clock.now(), start() + chrono::Duration::seconds(6));
    assert_eq!(tracker.snapshot(Tier::Small).hourly_used, 3);
}

#[test]
fn test_transient_errors_exhaust_local_retries() {
    let clock = manual_clock();
    let tracker = tracker(10, Arc::clone(&clock));
    let backend = ScriptedBackend::new(|_, _, nth| CallOutcome::TransientError(format!("fail {nth}")));
    let ctx = SlotContext {
        backend: &backend,
        extractor: &LastLetterExtractor,
        tracker: &tracker,
        clock: &*clock,
        backoff: backoff(3),
    };

    match ctx.execute(Tier::Small, queued("q1")) {
        SlotEvent::Exhausted {
            task, last_error, ..
        } => {
            assert_eq!(task.attempts, 3);
            assert_eq!(last_error, "fail 3");
        }
        other => panic!("unexpected event {other:?}"),
    }
    // 2s + 4s; no sleep after the last attempt.
    assert_eq!(clock.now(), start() + chrono::Duration::seconds(6));
}

#[test]
fn test_retry_stops_when_quota_runs_out() {
    let clock = manual_clock();
    let tracker = tracker(2, Arc::clone(&clock));
    let backend = ScriptedBackend::new(|_, _, _| CallOutcome::TransientError("timeout".to_string()));
    let ctx = SlotContext {
        backend: &backend,
        extractor: &LastLetterExtractor,
        tracker: &tracker,
        clock: &*clock,
        backoff: backoff(5),
    };

    let event = ctx.execute(Tier::Small, queued("q1"));
    match event {
        SlotEvent::Denied { task, .. } => assert_eq!(task.attempts, 2),
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(backend.call_count(Tier::Small), 2);
}

#[test]
fn test_requeued_task_resumes_its_retry_budget() {
    let clock = manual_clock();
    let tracker = tracker(2, Arc::clone(&clock));
    let backend = ScriptedBackend::new(|_, _, nth| CallOutcome::TransientError(format!("fail {nth}")));
    let ctx = SlotContext {
        backend: &backend,
        extractor: &LastLetterExtractor,
        tracker: &tracker,
        clock: &*clock,
        backoff: backoff(3),
    };

    let requeued = match ctx.execute(Tier::Small, queued("q1")) {
        SlotEvent::Denied { task, .. } => task,
        other => panic!("unexpected event {other:?}"),
    };
    assert_eq!(requeued.tier_attempts.small, 2);
    assert_eq!(requeued.last_error.as_deref(), Some("fail 2"));

    clock.advance(Duration::from_secs(3600));
    match ctx.execute(Tier::Small, requeued) {
        SlotEvent::Exhausted {
            task, last_error, ..
        } => {
            assert_eq!(task.attempts, 3);
            assert_eq!(last_error, "fail 3");
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(backend.call_count(Tier::Small), 3);
}

#[test]
fn test_spent_budget_exhausts_without_a_call() {
    let clock = manual_clock();
    let tracker = tracker(10, Arc::clone(&clock));
    let backend = ScriptedBackend::answering();
    let ctx = SlotContext {
        backend: &backend,
        extractor: &LastLetterExtractor,
        tracker: &tracker,
        clock: &*clock,
        backoff: backoff(3),
    };
    let mut item = queued("q1");
    item.tier_attempts.small = 3;
    item.last_error = Some("HTTP 502".to_string());

    match ctx.execute(Tier::Small, item) {
        SlotEvent::Exhausted { last_error, .. } => assert_eq!(last_error, "HTTP 502"),
        other => panic!("unexpected event {other:?}"),
    }
    assert!(backend.calls().is_empty());
    assert_eq!(tracker.snapshot(Tier::Small).hourly_used, 0);

    // The other tier keeps its own budget.
    let mut item = queued("q2");
    item.tier_attempts.small = 3;
    assert!(matches!(
        ctx.execute(Tier::Large, item),
        SlotEvent::Completed { tier: Tier::Large, .. }
    ));
}

#[test]
fn test_pool_runs_every_task_once_and_drains() {
    let clock = manual_clock();
    let tracker = tracker(100, Arc::clone(&clock));
    let backend = ScriptedBackend::answering();
    let ctx = SlotContext {
        backend: &backend,
        extractor: &LastLetterExtractor,
        tracker: &tracker,
        clock: &*clock,
        backoff: backoff(3),
    };
    let ids: Vec<String> = (0..12).map(|i| format!("q{i}")).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let source = ListSource::with(&id_refs);

    thread::scope(|scope| {
        let (pool, started) = TierWorkerPool::start(scope, Tier::Small, 3, &source, &ctx);
        started.unwrap();
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.tier(), Tier::Small);
        pool.drain().unwrap();
    });

    let events = source.events.lock().unwrap();
    assert_eq!(events.len(), 12);
    assert!(events.iter().all(|e| matches!(e, SlotEvent::Completed { .. })));
    let mut called: Vec<String> = backend.calls().into_iter().map(|(_, id)| id).collect();
    called.sort();
    called.dedup();
    assert_eq!(called.len(), 12);
    assert!(!backend.saw_overlap());
    // Each slot's final pull returns None.
    assert_eq!(source.pulls.load(Ordering::SeqCst), 12 + 3);
}

#[test]
fn test_pause_and_resume_go_through_source() {
    let clock = manual_clock();
    let tracker = tracker(100, Arc::clone(&clock));
    let backend = ScriptedBackend::answering();
    let ctx = SlotContext {
        backend: &backend,
        extractor: &LastLetterExtractor,
        tracker: &tracker,
        clock: &*clock,
        backoff: backoff(3),
    };
    let source = ListSource::default();

    thread::scope(|scope| {
        let (pool, started) = TierWorkerPool::start(scope, Tier::Large, 1, &source, &ctx);
        started.unwrap();
        pool.pause();
        pool.resume();
        pool.drain().unwrap();
    });

    assert_eq!(
        *source.paused.lock().unwrap(),
        vec![(Tier::Large, true), (Tier::Large, false)]
    );
}
