use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use threadwork_core::future::combinators::make_failure_list_future;
use threadwork_core::TaskResult;
use threadwork_keyed::KeyDistributedExecutor;
use threadwork_limiter::ExecutorLimiter;
use threadwork_scheduler::{PriorityScheduler, SchedulerMetrics};
use tracing::{info, warn};

use crate::cli::BenchArgs;

/// Outcome of one workload run.
#[derive(Debug, Serialize)]
pub struct BenchReport {
    pub started_at: DateTime<Utc>,
    pub keys: usize,
    pub tasks_per_key: usize,
    pub concurrency: usize,
    pub elapsed_ms: u128,
    pub tasks_per_sec: f64,
    /// Highest number of workload tasks observed running at once.
    pub peak_running: usize,
    pub failed_tasks: usize,
    /// Keys whose log did not match submission order.
    pub out_of_order_keys: Vec<usize>,
    pub scheduler: SchedulerMetrics,
}

impl BenchReport {
    pub fn is_ok(&self) -> bool {
        self.out_of_order_keys.is_empty() && self.failed_tasks == 0 && self.peak_running <= self.concurrency
    }
}

pub fn run(args: &BenchArgs, scheduler: &PriorityScheduler) -> Result<BenchReport> {
    let limiter = ExecutorLimiter::with_name(scheduler.with_priority(args.priority), args.concurrency, "bench")
        .context("failed to build limiter")?;
    let keyed = KeyDistributedExecutor::builder(limiter)
        .max_tasks_per_cycle(args.tasks_per_cycle)
        .build()
        .context("failed to build key distributor")?;

    let logs: Vec<Arc<Mutex<Vec<usize>>>> = (0..args.keys).map(|_| Arc::default()).collect();
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let work = Duration::from_micros(args.task_micros);

    info!(
        keys = args.keys,
        tasks_per_key = args.tasks_per_key,
        concurrency = args.concurrency,
        "Submitting workload"
    );
    let started_at = Utc::now();
    let start = Instant::now();
    let mut futures: Vec<TaskResult<()>> = Vec::with_capacity(args.keys * args.tasks_per_key);
    for seq in 0..args.tasks_per_key {
        for (key, log) in logs.iter().enumerate() {
            let (log, running, peak) = (Arc::clone(log), Arc::clone(&running), Arc::clone(&peak));
            let future = keyed.submit_task(key, move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                if !work.is_zero() {
                    thread::sleep(work);
                }
                log.lock().push(seq);
                running.fetch_sub(1, Ordering::SeqCst);
            })?;
            futures.push(future);
        }
    }

    let failures = make_failure_list_future(&futures)
        .get_timeout(Duration::from_secs(args.timeout_secs))
        .context("workload did not finish in time")?;
    let elapsed = start.elapsed();

    let out_of_order_keys: Vec<usize> = logs
        .iter()
        .enumerate()
        .filter(|(_, log)| !is_sequential(&log.lock(), args.tasks_per_key))
        .map(|(key, _)| key)
        .collect();
    if !out_of_order_keys.is_empty() {
        warn!(keys = ?out_of_order_keys, "Keys ran out of submission order");
    }

    let total = futures.len();
    let secs = elapsed.as_secs_f64();
    Ok(BenchReport {
        started_at,
        keys: args.keys,
        tasks_per_key: args.tasks_per_key,
        concurrency: args.concurrency,
        elapsed_ms: elapsed.as_millis(),
        tasks_per_sec: if secs > 0.0 { total as f64 / secs } else { 0.0 },
        peak_running: peak.load(Ordering::SeqCst),
        failed_tasks: failures.len(),
        out_of_order_keys,
        scheduler: scheduler.metrics(),
    })
}

fn is_sequential(log: &[usize], expected: usize) -> bool {
    log.len() == expected && log.iter().enumerate().all(|(i, seq)| i == *seq)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn sequential_check() {
        assert!(is_sequential(&[0, 1, 2], 3));
        assert!(!is_sequential(&[0, 2, 1], 3));
        assert!(!is_sequential(&[0, 1], 3));
    }

    #[test]
    fn small_workload_runs_in_order() {
        let args = BenchArgs::parse_from([
            "threadwork-bench",
            "--keys",
            "3",
            "--tasks-per-key",
            "20",
            "--concurrency",
            "2",
            "--task-micros",
            "0",
        ]);
        let scheduler = PriorityScheduler::with_pool_size(4).unwrap();
        let report = run(&args, &scheduler).unwrap();
        assert!(report.is_ok(), "{:?}", report);
        assert_eq!(report.failed_tasks, 0);
        assert!(report.peak_running <= 2);
        scheduler.shutdown();
    }
}
