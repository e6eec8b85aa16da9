use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use threadwork_core::Result;
use tracing::info;

use crate::metrics::SchedulerMetrics;
use crate::queue::TaskQueue;
use crate::task::UnrunTask;
use crate::types::{Priority, SchedulerConfig};

/// Pool bookkeeping guarded by the scheduler lock.
pub(super) struct PoolState {
    pub(super) queue: TaskQueue,
    /// Worker threads alive (or being spawned).
    pub(super) pool_size: usize,
    /// Workers parked on the work condvar.
    pub(super) idle: usize,
    /// Tasks currently executing.
    pub(super) running: usize,
    pub(super) shutdown: bool,
}

pub(super) struct Shared {
    pub(super) config: SchedulerConfig,
    pub(super) max_pool_size: usize,
    pub(super) state: Mutex<PoolState>,
    /// Signalled on new work and on shutdown.
    pub(super) work_available: Condvar,
    /// Signalled when the last worker exits after shutdown.
    pub(super) terminated: Condvar,
    pub(super) metrics: Mutex<SchedulerMetrics>,
    pub(super) max_wait_low_ms: AtomicU64,
    pub(super) next_task_id: AtomicU64,
    pub(super) next_thread_id: AtomicUsize,
}

impl Shared {
    pub(super) fn max_wait_for_low_priority(&self) -> Duration {
        Duration::from_millis(self.max_wait_low_ms.load(Ordering::Relaxed))
    }

    pub(super) fn is_terminated(state: &PoolState) -> bool {
        state.shutdown && state.pool_size == 0
    }
}

/// Thread pool that runs one-time and fixed-delay recurring tasks in
/// priority order.
///
/// Handles are cheap to clone; every clone drives the same pool. Workers
/// are spawned lazily on submission, up to `core_pool_size`, and beyond that
/// up to the maximum only while no worker is idle.
#[derive(Clone)]
pub struct PriorityScheduler {
    pub(super) shared: Arc<Shared>,
}

impl PriorityScheduler {
    /// Create a new scheduler. No threads are started until work arrives.
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        let max_pool_size = config.resolved_max_pool_size();
        info!(
            "Priority scheduler created: core={} max={} default_priority={}",
            config.core_pool_size, max_pool_size, config.default_priority
        );
        Ok(Self {
            shared: Arc::new(Shared {
                max_wait_low_ms: AtomicU64::new(config.max_wait_for_low_priority_ms),
                config,
                max_pool_size,
                state: Mutex::new(PoolState {
                    queue: TaskQueue::new(),
                    pool_size: 0,
                    idle: 0,
                    running: 0,
                    shutdown: false,
                }),
                work_available: Condvar::new(),
                terminated: Condvar::new(),
                metrics: Mutex::new(SchedulerMetrics::default()),
                next_task_id: AtomicU64::new(1),
                next_thread_id: AtomicUsize::new(1),
            }),
        })
    }

    /// Fixed-size pool of `n` threads with otherwise default settings.
    pub fn with_pool_size(n: usize) -> Result<Self> {
        Self::new(SchedulerConfig::with_pool_size(n))
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    pub fn default_priority(&self) -> Priority {
        self.shared.config.default_priority
    }

    pub fn max_pool_size(&self) -> usize {
        self.shared.max_pool_size
    }

    pub fn current_pool_size(&self) -> usize {
        self.shared.state.lock().pool_size
    }

    /// Tasks waiting in the queue, including recurring tasks between runs.
    pub fn queued_task_count(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn queued_task_count_for(&self, priority: Priority) -> usize {
        self.shared.state.lock().queue.len_for(priority)
    }

    pub fn running_task_count(&self) -> usize {
        self.shared.state.lock().running
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.state.lock().shutdown
    }

    pub fn max_wait_for_low_priority(&self) -> Duration {
        self.shared.max_wait_for_low_priority()
    }

    /// Change how long an eligible low-priority task may wait behind
    /// high-priority work. Takes effect on the next dequeue.
    pub fn set_max_wait_for_low_priority(&self, max_wait: Duration) {
        let ms = u64::try_from(max_wait.as_millis()).unwrap_or(u64::MAX);
        self.shared.max_wait_low_ms.store(ms, Ordering::Relaxed);
    }

    /// Snapshot of the scheduler metrics.
    pub fn metrics(&self) -> SchedulerMetrics {
        let (pool_size, queued_tasks) = {
            let state = self.shared.state.lock();
            (state.pool_size, state.queue.len())
        };
        let mut metrics = self.shared.metrics.lock().clone();
        metrics.pool_size = pool_size;
        metrics.queued_tasks = queued_tasks;
        metrics
    }

    /// Stop accepting tasks. Queued one-time tasks still run; queued
    /// recurring tasks are removed and their handles cancelled.
    pub fn shutdown(&self) {
        let recurring = {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            if Shared::is_terminated(&state) {
                self.shared.terminated.notify_all();
            }
            state.queue.drain_recurring()
        };
        self.shared.work_available.notify_all();
        info!("Scheduler shutdown requested ({} recurring tasks cancelled)", recurring.len());
        for task in recurring {
            task.cancel();
        }
    }

    /// Stop accepting tasks and return everything still queued. Running
    /// tasks are left to finish.
    pub fn shutdown_now(&self) -> Vec<UnrunTask> {
        let drained = {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            if Shared::is_terminated(&state) {
                self.shared.terminated.notify_all();
            }
            state.queue.drain_all()
        };
        self.shared.work_available.notify_all();
        info!("Scheduler shutdown now: {} queued tasks returned", drained.len());
        drained.into_iter().map(UnrunTask::from).collect()
    }

    /// Block until every worker has exited after shutdown, or `timeout`
    /// elapses. Returns whether the pool terminated.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let mut state = self.shared.state.lock();
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            while !Shared::is_terminated(&state) {
                self.shared.terminated.wait(&mut state);
            }
            return true;
        };
        while !Shared::is_terminated(&state) {
            if self.shared.terminated.wait_until(&mut state, deadline).timed_out() {
                return Shared::is_terminated(&state);
            }
        }
        true
    }
}
