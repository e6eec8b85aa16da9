//! Integration tests for admission control on a real priority scheduler.
//!
//! Verifies the concurrency bound under bursts, FIFO re-admission as slots
//! free, and delayed / recurring submission through `SchedulerLimiter` and
//! `KeyedLimiter`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use threadwork_core::{Executor, Scheduler, SubmitterExecutor, SubmitterScheduler, ThreadworkError};
use threadwork_limiter::{ExecutorLimiter, KeyedLimiter, QueueLimitRejector, SchedulerLimiter};
use threadwork_scheduler::PriorityScheduler;

const TIMEOUT: Duration = Duration::from_secs(5);

fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// Tracks how many instrumented tasks are inside their body at once.
#[derive(Clone, Default)]
struct Gauge {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Gauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[test]
fn running_count_never_exceeds_limit_under_burst() {
    let scheduler = PriorityScheduler::with_pool_size(8).unwrap();
    let limiter = ExecutorLimiter::new(scheduler.clone(), 3).unwrap();
    let gauge = Gauge::default();

    let futures: Vec<_> = (0..60)
        .map(|i| {
            let gauge = gauge.clone();
            limiter
                .submit(move || {
                    gauge.enter();
                    thread::sleep(Duration::from_millis(1 + i % 3));
                    gauge.exit();
                })
                .unwrap()
        })
        .collect();

    for f in &futures {
        f.get_timeout(TIMEOUT).unwrap();
    }
    assert!(gauge.peak() <= 3, "peak concurrency {}", gauge.peak());
    assert!(gauge.peak() >= 2);
    assert!(wait_for(|| limiter.current_running_count() == 0));
    scheduler.shutdown();
}

#[test]
fn releasing_one_task_admits_exactly_one() {
    let scheduler = PriorityScheduler::with_pool_size(5).unwrap();
    let limiter = ExecutorLimiter::new(scheduler.clone(), 2).unwrap();
    let gauge = Gauge::default();
    let mut releases = Vec::new();

    let futures: Vec<_> = (0..5)
        .map(|_| {
            let (tx, rx) = mpsc::channel::<()>();
            releases.push(tx);
            let gauge = gauge.clone();
            limiter
                .submit(move || {
                    gauge.enter();
                    rx.recv().ok();
                    gauge.exit();
                })
                .unwrap()
        })
        .collect();

    assert!(wait_for(|| gauge.current() == 2));
    assert_eq!(limiter.unsubmitted_task_count(), 3);

    // the first two were admitted; release the first
    releases[0].send(()).unwrap();
    futures[0].get_timeout(TIMEOUT).unwrap();
    assert!(wait_for(|| limiter.unsubmitted_task_count() == 2));
    assert!(wait_for(|| gauge.current() == 2));
    thread::sleep(Duration::from_millis(30));
    assert_eq!(gauge.current(), 2);
    assert_eq!(limiter.current_running_count(), 2);

    for tx in &releases[1..] {
        tx.send(()).unwrap();
    }
    for f in &futures {
        f.get_timeout(TIMEOUT).unwrap();
    }
    assert_eq!(gauge.peak(), 2);
    scheduler.shutdown();
}

#[test]
fn queued_tasks_start_in_submission_order() {
    let scheduler = PriorityScheduler::with_pool_size(4).unwrap();
    let limiter = ExecutorLimiter::new(scheduler.clone(), 1).unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));
    let futures: Vec<_> = (0..20)
        .map(|i| {
            let order = Arc::clone(&order);
            limiter.submit(move || order.lock().push(i)).unwrap()
        })
        .collect();
    for f in &futures {
        f.get_timeout(TIMEOUT).unwrap();
    }
    assert_eq!(*order.lock(), (0..20).collect::<Vec<_>>());
    scheduler.shutdown();
}

#[test]
fn failures_stay_in_their_future() {
    let scheduler = PriorityScheduler::with_pool_size(2).unwrap();
    let limiter = ExecutorLimiter::new(scheduler.clone(), 1).unwrap();
    let bad = limiter.submit(|| -> u32 { panic!("limited task failed") }).unwrap();
    let good = limiter.submit(|| 5u32).unwrap();
    assert!(matches!(bad.get_timeout(TIMEOUT), Err(ThreadworkError::ExecutionFailure(_))));
    assert_eq!(good.get_timeout(TIMEOUT).unwrap(), 5);
    scheduler.shutdown();
}

#[test]
fn limiter_on_shut_down_scheduler_rejects() {
    let scheduler = PriorityScheduler::with_pool_size(1).unwrap();
    let limiter = ExecutorLimiter::new(scheduler.clone(), 2).unwrap();
    scheduler.shutdown();
    let err = limiter.submit(|| ()).unwrap_err();
    assert!(matches!(err, ThreadworkError::RejectedSubmission(_)));
    assert_eq!(limiter.current_running_count(), 0);
}

#[test]
fn delayed_task_is_admitted_when_delay_elapses() {
    let scheduler = PriorityScheduler::with_pool_size(4).unwrap();
    let limiter = SchedulerLimiter::new(scheduler.clone(), 1).unwrap();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let blocker = limiter.submit(move || {
        release_rx.recv().ok();
    });
    let blocker = blocker.unwrap();

    let start = Instant::now();
    let delayed = limiter.submit_scheduled(Instant::now, Duration::from_millis(40)).unwrap();
    // not waiting for admission until the delay has passed
    assert_eq!(limiter.unsubmitted_task_count(), 0);
    assert!(wait_for(|| limiter.unsubmitted_task_count() == 1));
    assert!(start.elapsed() >= Duration::from_millis(40));

    release_tx.send(()).unwrap();
    blocker.get_timeout(TIMEOUT).unwrap();
    let ran_at = delayed.get_timeout(TIMEOUT).unwrap();
    assert!(ran_at.duration_since(start) >= Duration::from_millis(40));
    scheduler.shutdown();
}

#[test]
fn recurring_task_is_admitted_per_firing() {
    let scheduler = PriorityScheduler::with_pool_size(4).unwrap();
    let limiter = SchedulerLimiter::new(scheduler.clone(), 1).unwrap();
    let gauge = Gauge::default();
    let count = Arc::new(AtomicUsize::new(0));
    let starts = Arc::new(Mutex::new(Vec::new()));

    let (g, c, s) = (gauge.clone(), Arc::clone(&count), Arc::clone(&starts));
    let handle = limiter
        .schedule_with_fixed_delay(
            Arc::new(move || {
                g.enter();
                s.lock().push(Instant::now());
                c.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(5));
                g.exit();
            }),
            Duration::ZERO,
            Duration::from_millis(15),
        )
        .unwrap();

    // between firings the slot is free for other work
    assert!(wait_for(|| count.load(Ordering::SeqCst) >= 1));
    let other = limiter.submit(|| "interleaved").unwrap();
    assert_eq!(other.get_timeout(TIMEOUT).unwrap(), "interleaved");

    assert!(wait_for(|| count.load(Ordering::SeqCst) >= 4));
    // already started, so cancel reports false and still ends the recurrence
    assert!(!handle.cancel(false));
    assert!(handle.is_cancelled());
    assert_eq!(gauge.peak(), 1);
    let starts = starts.lock().clone();
    for pair in starts.windows(2) {
        assert!(pair[1].duration_since(pair[0]) >= Duration::from_millis(20));
    }

    thread::sleep(Duration::from_millis(40));
    let settled = count.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(40));
    assert_eq!(count.load(Ordering::SeqCst), settled);
    scheduler.shutdown();
}

#[test]
fn scheduler_limiter_reports_target_shutdown() {
    let scheduler = PriorityScheduler::with_pool_size(1).unwrap();
    let limiter = SchedulerLimiter::new(scheduler.clone(), 1).unwrap();
    assert!(!Scheduler::is_shutdown(&limiter));
    scheduler.shutdown();
    assert!(Scheduler::is_shutdown(&limiter));
}

#[test]
fn keyed_limiter_bounds_each_key() {
    let scheduler = PriorityScheduler::with_pool_size(8).unwrap();
    let limiter = KeyedLimiter::new(scheduler.clone(), 2).unwrap();
    let gauges: Vec<Gauge> = (0..3).map(|_| Gauge::default()).collect();

    let mut futures = Vec::new();
    for round in 0..10 {
        for (key, gauge) in gauges.iter().enumerate() {
            let gauge = gauge.clone();
            futures.push(
                limiter
                    .submit(key, move || {
                        gauge.enter();
                        thread::sleep(Duration::from_millis(1 + round % 2));
                        gauge.exit();
                    })
                    .unwrap(),
            );
        }
    }
    for f in &futures {
        f.get_timeout(TIMEOUT).unwrap();
    }
    for gauge in &gauges {
        assert!(gauge.peak() <= 2);
    }
    assert!(wait_for(|| limiter.tracked_key_count() == 0));
    scheduler.shutdown();
}

#[test]
fn keyed_delayed_task_waits_for_its_key_slot_at_fire_time() {
    let scheduler = PriorityScheduler::with_pool_size(4).unwrap();
    let limiter = KeyedLimiter::new(scheduler.clone(), 1).unwrap();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let (started_tx, started_rx) = mpsc::channel::<()>();
    let blocker = limiter
        .submit("tenant", move || {
            started_tx.send(()).ok();
            release_rx.recv().ok();
        })
        .unwrap();
    started_rx.recv_timeout(TIMEOUT).unwrap();

    let scheduled_at = Instant::now();
    let delayed = limiter.submit_scheduled("tenant", Instant::now, Duration::from_millis(20)).unwrap();
    // other keys are not held up by the busy one
    let other = limiter
        .submit_scheduled("other", || "free", Duration::from_millis(20))
        .unwrap();
    assert_eq!(other.get_timeout(TIMEOUT).unwrap(), "free");

    // fired, but queued behind the running task for its key
    assert!(wait_for(|| limiter.unsubmitted_task_count(&"tenant") == 1));
    assert!(!delayed.is_done());

    release_tx.send(()).unwrap();
    blocker.get_timeout(TIMEOUT).unwrap();
    let ran_at = delayed.get_timeout(TIMEOUT).unwrap();
    assert!(ran_at.duration_since(scheduled_at) >= Duration::from_millis(20));
    assert!(wait_for(|| limiter.tracked_key_count() == 0));
    scheduler.shutdown();
}

#[test]
fn keyed_cancelled_delayed_task_never_runs() {
    let scheduler = PriorityScheduler::with_pool_size(2).unwrap();
    let limiter = KeyedLimiter::new(scheduler.clone(), 1).unwrap();
    let ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ran);
    let future = limiter
        .submit_scheduled(
            7u32,
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            Duration::from_millis(30),
        )
        .unwrap();
    assert!(future.cancel(false));
    thread::sleep(Duration::from_millis(60));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(limiter.tracked_key_count(), 0);
    scheduler.shutdown();
}

#[test]
fn keyed_recurring_task_shares_its_key_limit() {
    let scheduler = PriorityScheduler::with_pool_size(4).unwrap();
    let limiter = KeyedLimiter::new(scheduler.clone(), 1).unwrap();
    let gauge = Gauge::default();
    let count = Arc::new(AtomicUsize::new(0));

    let (g, c) = (gauge.clone(), Arc::clone(&count));
    let handle = limiter
        .schedule_with_fixed_delay(
            "jobs",
            move || {
                g.enter();
                c.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(3));
                g.exit();
            },
            Duration::ZERO,
            Duration::from_millis(5),
        )
        .unwrap();

    // one-off work on the same key interleaves without overlapping
    let mut futures = Vec::new();
    for _ in 0..5 {
        let g = gauge.clone();
        futures.push(
            limiter
                .submit("jobs", move || {
                    g.enter();
                    thread::sleep(Duration::from_millis(2));
                    g.exit();
                })
                .unwrap(),
        );
    }
    for f in &futures {
        f.get_timeout(TIMEOUT).unwrap();
    }
    assert!(wait_for(|| count.load(Ordering::SeqCst) >= 3));
    assert!(!handle.cancel(false));
    assert_eq!(gauge.peak(), 1);

    thread::sleep(Duration::from_millis(30));
    let settled = count.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(30));
    assert_eq!(count.load(Ordering::SeqCst), settled);
    assert!(wait_for(|| limiter.tracked_key_count() == 0));
    scheduler.shutdown();
}

#[test]
fn keyed_limiter_reports_target_shutdown() {
    let scheduler = PriorityScheduler::with_pool_size(1).unwrap();
    let limiter = KeyedLimiter::new(scheduler.clone(), 1).unwrap();
    assert!(!limiter.is_shutdown());
    scheduler.shutdown();
    assert!(limiter.is_shutdown());
    assert!(matches!(
        limiter.schedule("k", || {}, Duration::from_millis(5)),
        Err(ThreadworkError::RejectedSubmission(_))
    ));
}

#[test]
fn rejector_in_front_of_busy_scheduler() {
    let scheduler = PriorityScheduler::with_pool_size(1).unwrap();
    let rejector = QueueLimitRejector::new(scheduler.clone(), 2).unwrap();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let (started_tx, started_rx) = mpsc::channel::<()>();
    rejector
        .execute(Box::new(move || {
            started_tx.send(()).ok();
            release_rx.recv().ok();
        }))
        .unwrap();
    started_rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(rejector.queued_task_count(), 0);

    let a = rejector.submit(|| 1).unwrap();
    let b = rejector.submit(|| 2).unwrap();
    assert_eq!(rejector.queued_task_count(), 2);
    assert!(matches!(rejector.submit(|| 3), Err(ThreadworkError::RejectedSubmission(_))));

    release_tx.send(()).unwrap();
    assert_eq!(a.get_timeout(TIMEOUT).unwrap() + b.get_timeout(TIMEOUT).unwrap(), 3);
    assert!(wait_for(|| rejector.queued_task_count() == 0));
    scheduler.shutdown();
}
