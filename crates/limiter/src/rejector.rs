use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use threadwork_core::{
    Executor, RecurringTask, Result, Runnable, Scheduler, TaskHandle, TaskResult, ThreadworkError,
};

/// Counts a task from forwarding until it starts or is dropped unrun.
struct QueuedTicket {
    queued: Arc<AtomicUsize>,
    released: bool,
}

impl QueuedTicket {
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.queued.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl Drop for QueuedTicket {
    fn drop(&mut self) {
        self.release();
    }
}

/// Rejects submissions once too many forwarded tasks are still waiting to
/// start on the target.
///
/// Only tasks that have been handed to the target and not yet begun count
/// toward the limit. Recurring tasks pass straight through uncounted.
pub struct QueueLimitRejector<E> {
    target: E,
    queued: Arc<AtomicUsize>,
    queue_limit: AtomicUsize,
}

impl<E: Executor> QueueLimitRejector<E> {
    pub fn new(target: E, queue_limit: usize) -> Result<Self> {
        if queue_limit == 0 {
            return Err(ThreadworkError::invalid_argument("queue_limit must be greater than zero"));
        }
        Ok(Self {
            target,
            queued: Arc::new(AtomicUsize::new(0)),
            queue_limit: AtomicUsize::new(queue_limit),
        })
    }

    pub fn target(&self) -> &E {
        &self.target
    }

    /// Tasks forwarded to the target that have not started yet.
    pub fn queued_task_count(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    pub fn queue_limit(&self) -> usize {
        self.queue_limit.load(Ordering::Acquire)
    }

    /// Change the limit. Tasks already queued are unaffected.
    pub fn set_queue_limit(&self, queue_limit: usize) -> Result<()> {
        if queue_limit == 0 {
            return Err(ThreadworkError::invalid_argument("queue_limit must be greater than zero"));
        }
        self.queue_limit.store(queue_limit, Ordering::Release);
        Ok(())
    }

    /// Reserve a queue position, or reject when the queue is full.
    fn reserve(&self) -> Result<QueuedTicket> {
        let limit = self.queue_limit();
        let reserved = self
            .queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |queued| {
                (queued < limit).then_some(queued + 1)
            });
        match reserved {
            Ok(_) => Ok(QueuedTicket {
                queued: Arc::clone(&self.queued),
                released: false,
            }),
            Err(queued) => Err(ThreadworkError::rejected(format!(
                "queue limit reached ({} of {} queued)",
                queued, limit
            ))),
        }
    }

    fn wrap(&self, task: Runnable) -> Result<Runnable> {
        let mut ticket = self.reserve()?;
        Ok(Box::new(move || {
            ticket.release();
            task();
        }))
    }
}

impl<E: Executor> Executor for QueueLimitRejector<E> {
    fn execute(&self, task: Runnable) -> Result<()> {
        self.target.execute(self.wrap(task)?)
    }

    fn execute_tracked(&self, task: Runnable, future: TaskHandle) -> Result<()> {
        self.target.execute_tracked(self.wrap(task)?, future)
    }
}

impl<E: Scheduler> Scheduler for QueueLimitRejector<E> {
    fn schedule(&self, task: Runnable, delay: Duration) -> Result<()> {
        self.target.schedule(self.wrap(task)?, delay)
    }

    fn schedule_tracked(&self, task: Runnable, delay: Duration, future: TaskHandle) -> Result<()> {
        self.target.schedule_tracked(self.wrap(task)?, delay, future)
    }

    fn schedule_with_fixed_delay(
        &self,
        task: RecurringTask,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<TaskResult<()>> {
        self.target.schedule_with_fixed_delay(task, initial_delay, period)
    }

    fn is_shutdown(&self) -> bool {
        self.target.is_shutdown()
    }
}
