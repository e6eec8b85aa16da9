//! The capability set every submission target implements.
//!
//! [`Executor`] and [`Scheduler`] are object-safe so layers can wrap
//! `Arc<dyn Executor>` as easily as concrete targets. Future-returning
//! submission comes from the [`SubmitterExecutor`] / [`SubmitterScheduler`]
//! extension traits, implemented for every target.

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::future::{FutureTask, ListenableFuture, TaskResult};

/// A one-shot unit of work.
pub type Runnable = Box<dyn FnOnce() + Send + 'static>;

/// A unit of work run once per firing of a recurring schedule.
pub type RecurringTask = Arc<dyn Fn() + Send + Sync + 'static>;

/// Type-erased handle to the future a task completes.
pub type TaskHandle = Arc<dyn ListenableFuture>;

pub trait Executor: Send + Sync {
    /// Hand `task` off for execution. Never runs it on the calling thread
    /// unless the implementation is explicitly a same-thread executor.
    fn execute(&self, task: Runnable) -> Result<()>;

    /// Like [`execute`](Self::execute), with the future `task` completes, so
    /// the target can drop the task early if the future is cancelled.
    fn execute_tracked(&self, task: Runnable, future: TaskHandle) -> Result<()> {
        let _ = future;
        self.execute(task)
    }
}

pub trait Scheduler: Executor {
    /// Run `task` once `delay` has elapsed.
    fn schedule(&self, task: Runnable, delay: Duration) -> Result<()>;

    fn schedule_tracked(&self, task: Runnable, delay: Duration, future: TaskHandle) -> Result<()> {
        let _ = future;
        self.schedule(task, delay)
    }

    /// Run `task` after `initial_delay`, then again `period` after each run
    /// finishes. The returned handle never completes normally: cancelling it
    /// stops further firings, and a panicking firing fails it.
    fn schedule_with_fixed_delay(
        &self,
        task: RecurringTask,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<TaskResult<()>>;

    fn is_shutdown(&self) -> bool;
}

/// Blanket implementation so `Arc<dyn Executor>` can be used directly.
impl<T: Executor + ?Sized> Executor for Arc<T> {
    fn execute(&self, task: Runnable) -> Result<()> {
        (**self).execute(task)
    }

    fn execute_tracked(&self, task: Runnable, future: TaskHandle) -> Result<()> {
        (**self).execute_tracked(task, future)
    }
}

impl<T: Scheduler + ?Sized> Scheduler for Arc<T> {
    fn schedule(&self, task: Runnable, delay: Duration) -> Result<()> {
        (**self).schedule(task, delay)
    }

    fn schedule_tracked(&self, task: Runnable, delay: Duration, future: TaskHandle) -> Result<()> {
        (**self).schedule_tracked(task, delay, future)
    }

    fn schedule_with_fixed_delay(
        &self,
        task: RecurringTask,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<TaskResult<()>> {
        (**self).schedule_with_fixed_delay(task, initial_delay, period)
    }

    fn is_shutdown(&self) -> bool {
        (**self).is_shutdown()
    }
}

/// Future-returning submission for any [`Executor`].
pub trait SubmitterExecutor: Executor {
    fn submit<T, F>(&self, task: F) -> Result<TaskResult<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.submit_task(FutureTask::new(task))
    }

    /// Submit a body whose `Err` resolves the future as failed.
    fn submit_callable<T, F>(&self, task: F) -> Result<TaskResult<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        self.submit_task(FutureTask::from_fallible(task))
    }

    fn submit_task<T: Send + 'static>(&self, task: FutureTask<T>) -> Result<TaskResult<T>> {
        let (runnable, result) = task.into_runnable();
        self.execute_tracked(runnable, Arc::new(result.clone()))?;
        Ok(result)
    }
}

impl<E: Executor + ?Sized> SubmitterExecutor for E {}

/// Future-returning delayed submission for any [`Scheduler`].
pub trait SubmitterScheduler: Scheduler {
    fn submit_scheduled<T, F>(&self, task: F, delay: Duration) -> Result<TaskResult<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.submit_scheduled_task(FutureTask::new(task), delay)
    }

    fn submit_scheduled_callable<T, F>(&self, task: F, delay: Duration) -> Result<TaskResult<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        self.submit_scheduled_task(FutureTask::from_fallible(task), delay)
    }

    fn submit_scheduled_task<T: Send + 'static>(
        &self,
        task: FutureTask<T>,
        delay: Duration,
    ) -> Result<TaskResult<T>> {
        let (runnable, result) = task.into_runnable();
        self.schedule_tracked(runnable, delay, Arc::new(result.clone()))?;
        Ok(result)
    }
}

impl<S: Scheduler + ?Sized> SubmitterScheduler for S {}

/// Runs every task inline on the submitting thread. Handy as a listener
/// executor and in tests; panics are routed to the exception handler.
#[derive(Debug, Default, Clone, Copy)]
pub struct SameThreadExecutor;

impl Executor for SameThreadExecutor {
    fn execute(&self, task: Runnable) -> Result<()> {
        crate::exception::run_guarded(task);
        Ok(())
    }
}
