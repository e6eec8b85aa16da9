//! Integration tests for per-key sequencing on a real priority scheduler.
//!
//! Covers submission-order execution for every pool size, non-overlap of
//! same-key tasks, manual-release completion order, and fairness between
//! keys when a worker's cycle limit is reached.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use threadwork_core::{FutureStatus, SubmitterExecutor, ThreadworkError};
use threadwork_keyed::KeyDistributedExecutor;
use threadwork_limiter::ExecutorLimiter;
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

#[test]
fn tasks_run_in_submission_order_for_any_pool_size() {
    for pool_size in [1, 2, 4, 8] {
        let scheduler = PriorityScheduler::with_pool_size(pool_size).unwrap();
        let kde = KeyDistributedExecutor::new(scheduler.clone());
        let logs: Vec<Arc<Mutex<Vec<usize>>>> = (0..4).map(|_| Arc::default()).collect();

        let mut futures = Vec::new();
        for i in 0..50 {
            for (key, log) in logs.iter().enumerate() {
                let log = Arc::clone(log);
                futures.push(kde.submit_task(key, move || log.lock().push(i)).unwrap());
            }
        }
        for f in &futures {
            f.get_timeout(TIMEOUT).unwrap();
        }
        for log in &logs {
            assert_eq!(*log.lock(), (0..50).collect::<Vec<_>>(), "pool size {}", pool_size);
        }
        assert!(wait_for(|| kde.task_queue_size_map().is_empty()));
        scheduler.shutdown();
    }
}

#[test]
fn same_key_tasks_never_overlap() {
    let scheduler = PriorityScheduler::with_pool_size(8).unwrap();
    let kde = KeyDistributedExecutor::builder(scheduler.clone())
        .max_tasks_per_cycle(3)
        .build()
        .unwrap();
    let intervals: Arc<Mutex<HashMap<u8, Vec<(Instant, Instant)>>>> = Arc::default();

    // submit from several threads at once
    let submitters: Vec<_> = (0..4)
        .map(|_| {
            let kde = kde.clone();
            let intervals = Arc::clone(&intervals);
            thread::spawn(move || {
                let mut futures = Vec::new();
                for i in 0..20u8 {
                    let key = i % 3;
                    let intervals = Arc::clone(&intervals);
                    futures.push(
                        kde.submit_task(key, move || {
                            let enter = Instant::now();
                            thread::sleep(Duration::from_micros(300));
                            let exit = Instant::now();
                            intervals.lock().entry(key).or_default().push((enter, exit));
                        })
                        .unwrap(),
                    );
                }
                futures
            })
        })
        .collect();

    for handle in submitters {
        for f in handle.join().unwrap() {
            f.get_timeout(TIMEOUT).unwrap();
        }
    }

    let intervals = intervals.lock();
    for (key, runs) in intervals.iter() {
        let mut runs = runs.clone();
        runs.sort();
        for pair in runs.windows(2) {
            assert!(pair[0].1 <= pair[1].0, "overlap on key {}", key);
        }
    }
    scheduler.shutdown();
}

#[test]
fn manual_release_completes_in_submission_order() {
    let scheduler = PriorityScheduler::with_pool_size(1).unwrap();
    let kde = KeyDistributedExecutor::new(scheduler.clone());
    let completed = Arc::new(Mutex::new(Vec::new()));

    let mut releases = Vec::new();
    let futures: Vec<_> = (1..=5)
        .map(|n| {
            let (tx, rx) = mpsc::channel::<()>();
            releases.push(tx);
            let completed = Arc::clone(&completed);
            kde.submit_task("K", move || {
                rx.recv().ok();
                completed.lock().push(format!("T{}", n));
            })
            .unwrap()
        })
        .collect();

    // release out of order; completion still follows submission order
    for tx in releases.iter().rev() {
        tx.send(()).unwrap();
        thread::sleep(Duration::from_millis(5));
    }
    for f in &futures {
        f.get_timeout(TIMEOUT).unwrap();
    }
    assert_eq!(*completed.lock(), vec!["T1", "T2", "T3", "T4", "T5"]);
    scheduler.shutdown();
}

#[test]
fn queue_size_while_first_task_blocks() {
    for accurate in [false, true] {
        let scheduler = PriorityScheduler::with_pool_size(2).unwrap();
        let kde = KeyDistributedExecutor::builder(scheduler.clone())
            .accurate_queue_size(accurate)
            .build()
            .unwrap();
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        kde.execute("key", move || {
            started_tx.send(()).ok();
            release_rx.recv().ok();
        })
        .unwrap();
        kde.execute("key", || {}).unwrap();
        kde.execute("key", || {}).unwrap();
        started_rx.recv_timeout(TIMEOUT).unwrap();

        let expected = if accurate { 3 } else { 2 };
        assert_eq!(kde.task_queue_size(&"key"), expected);
        assert_eq!(kde.task_queue_size_map()[&"key"], expected);

        release_tx.send(()).unwrap();
        assert!(wait_for(|| kde.task_queue_size(&"key") == 0));
        scheduler.shutdown();
    }
}

#[test]
fn cycle_limit_lets_other_keys_through() {
    let scheduler = PriorityScheduler::with_pool_size(3).unwrap();
    let single = ExecutorLimiter::new(scheduler.clone(), 1).unwrap();
    let kde = KeyDistributedExecutor::builder(single)
        .lock_stripes(2)
        .max_tasks_per_cycle(2)
        .build()
        .unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let waiting = Arc::new(AtomicUsize::new(0));
    let last_key1: Arc<Mutex<Option<Arc<AtomicBool>>>> = Arc::default();

    let producer = {
        let (kde, stop, waiting, last_key1) =
            (kde.clone(), Arc::clone(&stop), Arc::clone(&waiting), Arc::clone(&last_key1));
        thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                let ran = Arc::new(AtomicBool::new(false));
                *last_key1.lock() = Some(Arc::clone(&ran));
                waiting.fetch_add(1, Ordering::SeqCst);
                let waiting = Arc::clone(&waiting);
                let queued = kde.execute(1, move || {
                    waiting.fetch_sub(1, Ordering::SeqCst);
                    ran.store(true, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(10));
                });
                if queued.is_err() {
                    break;
                }
                thread::sleep(Duration::from_millis(1));
            }
        })
    };

    assert!(wait_for(|| waiting.load(Ordering::SeqCst) > 10));
    let key2 = kde.submit_task(2, || ()).unwrap();
    let tail = last_key1.lock().clone().unwrap();
    key2.get_timeout(TIMEOUT).unwrap();
    assert!(!tail.load(Ordering::SeqCst));

    stop.store(true, Ordering::SeqCst);
    producer.join().unwrap();
    scheduler.shutdown_now();
}

#[test]
fn scheduled_task_joins_key_after_delay() {
    let scheduler = PriorityScheduler::with_pool_size(2).unwrap();
    let kde = KeyDistributedExecutor::new(scheduler.clone());
    let log = Arc::new(Mutex::new(Vec::new()));

    let start = Instant::now();
    let delayed_log = Arc::clone(&log);
    let delayed = kde
        .submit_scheduled_task("k", move || delayed_log.lock().push("delayed"), Duration::from_millis(30))
        .unwrap();
    let plain_log = Arc::clone(&log);
    kde.schedule_task("k", move || plain_log.lock().push("immediate"), Duration::ZERO)
        .unwrap();

    delayed.get_timeout(TIMEOUT).unwrap();
    assert!(start.elapsed() >= Duration::from_millis(30));
    assert_eq!(*log.lock(), vec!["immediate", "delayed"]);
    scheduler.shutdown();
}

#[test]
fn cancelled_scheduled_task_never_runs() {
    let scheduler = PriorityScheduler::with_pool_size(1).unwrap();
    let kde = KeyDistributedExecutor::new(scheduler.clone());
    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);
    let future = kde
        .submit_scheduled_task(7u32, move || flag.store(true, Ordering::SeqCst), Duration::from_millis(30))
        .unwrap();
    assert!(future.cancel(false));
    thread::sleep(Duration::from_millis(80));
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(future.status(), FutureStatus::Cancelled);
    scheduler.shutdown();
}

#[test]
fn submitter_works_as_plain_executor() {
    let scheduler = PriorityScheduler::with_pool_size(4).unwrap();
    let kde = KeyDistributedExecutor::new(scheduler.clone());
    let submitter = kde.submitter_for_key("only");
    let counter = Arc::new(AtomicUsize::new(0));
    let futures: Vec<_> = (0..10)
        .map(|i| {
            let counter = Arc::clone(&counter);
            submitter
                .submit(move || {
                    // sequential, so the counter equals the submission index
                    counter.fetch_add(1, Ordering::SeqCst) == i
                })
                .unwrap()
        })
        .collect();
    for f in &futures {
        assert!(f.get_timeout(TIMEOUT).unwrap());
    }
    scheduler.shutdown();
}

#[test]
fn shut_down_target_rejects_new_keys() {
    let scheduler = PriorityScheduler::with_pool_size(1).unwrap();
    let kde = KeyDistributedExecutor::new(scheduler.clone());
    scheduler.shutdown();
    let err = kde.submit_task("late", || ()).unwrap_err();
    assert!(matches!(err, ThreadworkError::RejectedSubmission(_)));
    assert!(kde.task_queue_size_map().is_empty());
}
