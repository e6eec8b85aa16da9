use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use threadwork_core::{
    Executor, FutureTask, RecurringTask, Result, Runnable, Scheduler, TaskHandle, TaskResult,
    ThreadworkError,
};
use tracing::debug;

use crate::task::{run_time_after, TaskWrapper};
use crate::types::Priority;

use super::worker::spawn_worker;
use super::PriorityScheduler;

impl PriorityScheduler {
    fn next_id(&self) -> u64 {
        self.shared.next_task_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Queue a wrapper, growing the pool when needed.
    fn enqueue(&self, task: TaskWrapper) -> Result<()> {
        let spawn = {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                drop(state);
                drop(task);
                return Err(ThreadworkError::rejected("scheduler is shut down"));
            }
            debug!(id = task.id, priority = ?task.priority, "task queued");
            state.queue.push(task);
            let spawn = state.pool_size < self.shared.config.core_pool_size
                || (state.idle == 0 && state.pool_size < self.shared.max_pool_size);
            if spawn {
                state.pool_size += 1;
            }
            spawn
        };
        self.shared.work_available.notify_one();
        if spawn {
            spawn_worker(&self.shared);
        }
        Ok(())
    }

    fn enqueue_one_time(
        &self,
        task: Runnable,
        delay: Duration,
        priority: Priority,
        future: Option<TaskHandle>,
    ) -> Result<()> {
        let wrapper = TaskWrapper::one_time(
            self.next_id(),
            priority,
            run_time_after(Instant::now(), delay),
            task,
            future,
        );
        self.enqueue(wrapper)
    }

    fn enqueue_recurring(
        &self,
        task: RecurringTask,
        initial_delay: Duration,
        period: Duration,
        priority: Priority,
    ) -> Result<TaskResult<()>> {
        let handle = TaskResult::new();
        let wrapper = TaskWrapper::recurring(
            self.next_id(),
            priority,
            run_time_after(Instant::now(), initial_delay),
            task,
            period,
            handle.clone(),
        );
        self.enqueue(wrapper)?;
        Ok(handle)
    }

    fn enqueue_future<T: Send + 'static>(
        &self,
        task: FutureTask<T>,
        delay: Duration,
        priority: Priority,
    ) -> Result<TaskResult<T>> {
        let (runnable, result) = task.into_runnable();
        self.enqueue_one_time(runnable, delay, priority, Some(Arc::new(result.clone())))?;
        Ok(result)
    }

    /// Run `task` as soon as a worker is free.
    pub fn execute<F>(&self, task: F, priority: Priority) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue_one_time(Box::new(task), Duration::ZERO, priority, None)
    }

    /// Run `task` and resolve the returned future with its value.
    pub fn submit<T, F>(&self, task: F, priority: Priority) -> Result<TaskResult<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.enqueue_future(FutureTask::new(task), Duration::ZERO, priority)
    }

    pub fn submit_callable<T, F>(&self, task: F, priority: Priority) -> Result<TaskResult<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        self.enqueue_future(FutureTask::from_fallible(task), Duration::ZERO, priority)
    }

    /// Run `task` once `delay` has elapsed.
    pub fn schedule<F>(&self, task: F, delay: Duration, priority: Priority) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue_one_time(Box::new(task), delay, priority, None)
    }

    pub fn submit_scheduled<T, F>(&self, task: F, delay: Duration, priority: Priority) -> Result<TaskResult<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.enqueue_future(FutureTask::new(task), delay, priority)
    }

    pub fn submit_scheduled_callable<T, F>(
        &self,
        task: F,
        delay: Duration,
        priority: Priority,
    ) -> Result<TaskResult<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        self.enqueue_future(FutureTask::from_fallible(task), delay, priority)
    }

    /// Run `task` after `initial_delay`, then `period` after each run
    /// finishes (fixed delay, not fixed rate).
    ///
    /// The returned handle never completes normally. Cancel it to stop the
    /// recurrence; a panicking run fails it and ends the recurrence.
    pub fn schedule_with_fixed_delay<F>(
        &self,
        task: F,
        initial_delay: Duration,
        period: Duration,
        priority: Priority,
    ) -> Result<TaskResult<()>>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.enqueue_recurring(Arc::new(task), initial_delay, period, priority)
    }

    /// View of this scheduler that submits at `priority` through the
    /// capability traits.
    pub fn with_priority(&self, priority: Priority) -> PrioritizedScheduler {
        PrioritizedScheduler {
            scheduler: self.clone(),
            priority,
        }
    }
}

/// Submits to a [`PriorityScheduler`] at a fixed priority.
#[derive(Clone)]
pub struct PrioritizedScheduler {
    scheduler: PriorityScheduler,
    priority: Priority,
}

impl PrioritizedScheduler {
    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn scheduler(&self) -> &PriorityScheduler {
        &self.scheduler
    }
}

// ── Capability traits ───────────────────────────────────────────

impl Executor for PriorityScheduler {
    fn execute(&self, task: Runnable) -> Result<()> {
        self.enqueue_one_time(task, Duration::ZERO, self.default_priority(), None)
    }

    fn execute_tracked(&self, task: Runnable, future: TaskHandle) -> Result<()> {
        self.enqueue_one_time(task, Duration::ZERO, self.default_priority(), Some(future))
    }
}

impl Scheduler for PriorityScheduler {
    fn schedule(&self, task: Runnable, delay: Duration) -> Result<()> {
        self.enqueue_one_time(task, delay, self.default_priority(), None)
    }

    fn schedule_tracked(&self, task: Runnable, delay: Duration, future: TaskHandle) -> Result<()> {
        self.enqueue_one_time(task, delay, self.default_priority(), Some(future))
    }

    fn schedule_with_fixed_delay(
        &self,
        task: RecurringTask,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<TaskResult<()>> {
        self.enqueue_recurring(task, initial_delay, period, self.default_priority())
    }

    fn is_shutdown(&self) -> bool {
        PriorityScheduler::is_shutdown(self)
    }
}

impl Executor for PrioritizedScheduler {
    fn execute(&self, task: Runnable) -> Result<()> {
        self.scheduler.enqueue_one_time(task, Duration::ZERO, self.priority, None)
    }

    fn execute_tracked(&self, task: Runnable, future: TaskHandle) -> Result<()> {
        self.scheduler.enqueue_one_time(task, Duration::ZERO, self.priority, Some(future))
    }
}

impl Scheduler for PrioritizedScheduler {
    fn schedule(&self, task: Runnable, delay: Duration) -> Result<()> {
        self.scheduler.enqueue_one_time(task, delay, self.priority, None)
    }

    fn schedule_tracked(&self, task: Runnable, delay: Duration, future: TaskHandle) -> Result<()> {
        self.scheduler.enqueue_one_time(task, delay, self.priority, Some(future))
    }

    fn schedule_with_fixed_delay(
        &self,
        task: RecurringTask,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<TaskResult<()>> {
        self.scheduler.enqueue_recurring(task, initial_delay, period, self.priority)
    }

    fn is_shutdown(&self) -> bool {
        self.scheduler.is_shutdown()
    }
}
