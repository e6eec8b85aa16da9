use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use threadwork_core::exception::panic_to_error;
use threadwork_core::{
    Executor, RecurringTask, Result, Runnable, Scheduler, TaskHandle, TaskResult,
};
use tracing::{debug, warn};

use crate::limiter::{ExecutorLimiter, LimiterInner};

/// [`ExecutorLimiter`] over a [`Scheduler`] target, adding delayed and
/// recurring submission.
///
/// Delays are served by the target. Admission is decided when a delay
/// elapses, not when the task is scheduled, and each firing of a recurring
/// task is admitted on its own.
pub struct SchedulerLimiter<E: Scheduler + 'static> {
    limiter: ExecutorLimiter<E>,
}

impl<E: Scheduler + 'static> Clone for SchedulerLimiter<E> {
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
        }
    }
}

impl<E: Scheduler + 'static> SchedulerLimiter<E> {
    pub fn new(target: E, max_concurrency: usize) -> Result<Self> {
        Ok(Self {
            limiter: ExecutorLimiter::new(target, max_concurrency)?,
        })
    }

    pub fn with_name(target: E, max_concurrency: usize, name: impl Into<String>) -> Result<Self> {
        Ok(Self {
            limiter: ExecutorLimiter::with_name(target, max_concurrency, name)?,
        })
    }

    pub fn limiter(&self) -> &ExecutorLimiter<E> {
        &self.limiter
    }

    pub fn max_concurrency(&self) -> usize {
        self.limiter.max_concurrency()
    }

    pub fn current_running_count(&self) -> usize {
        self.limiter.current_running_count()
    }

    pub fn unsubmitted_task_count(&self) -> usize {
        self.limiter.unsubmitted_task_count()
    }

    fn schedule_admission(&self, task: Runnable, delay: Duration, future: Option<TaskHandle>) -> Result<()> {
        let inner = &self.limiter.inner;
        if delay.is_zero() {
            return inner.admit(task, future);
        }
        let admit_into = Arc::clone(inner);
        let tracked = future.clone();
        let thunk: Runnable = Box::new(move || {
            if let Err(e) = admit_into.admit(task, tracked.clone()) {
                warn!(error = %e, "delayed task could not be admitted");
                if let Some(future) = tracked {
                    future.cancel(false);
                }
            }
        });
        match future {
            Some(future) => inner.target().schedule_tracked(thunk, delay, future),
            None => inner.target().schedule(thunk, delay),
        }
    }
}

impl<E: Scheduler + 'static> Executor for SchedulerLimiter<E> {
    fn execute(&self, task: Runnable) -> Result<()> {
        self.limiter.execute(task)
    }

    fn execute_tracked(&self, task: Runnable, future: TaskHandle) -> Result<()> {
        self.limiter.execute_tracked(task, future)
    }
}

impl<E: Scheduler + 'static> Scheduler for SchedulerLimiter<E> {
    fn schedule(&self, task: Runnable, delay: Duration) -> Result<()> {
        self.schedule_admission(task, delay, None)
    }

    fn schedule_tracked(&self, task: Runnable, delay: Duration, future: TaskHandle) -> Result<()> {
        self.schedule_admission(task, delay, Some(future))
    }

    fn schedule_with_fixed_delay(
        &self,
        task: RecurringTask,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<TaskResult<()>> {
        start_recurrence(Arc::clone(&self.limiter.inner), task, initial_delay, period)
    }

    fn is_shutdown(&self) -> bool {
        self.limiter.target().is_shutdown()
    }
}

// ── Recurring replay ─────────────────────────────────────────────────

/// Where the firings of a recurring task are admitted and scheduled.
pub(crate) trait FiringAdmission: Send + Sync + 'static {
    /// Admit one run of the task.
    fn admit_firing(&self, run: Runnable) -> Result<()>;

    /// Have the underlying scheduler fire `firing` after `delay`.
    fn schedule_firing(&self, firing: Runnable, delay: Duration, handle: TaskHandle) -> Result<()>;
}

impl<E: Scheduler + 'static> FiringAdmission for Arc<LimiterInner<E>> {
    fn admit_firing(&self, run: Runnable) -> Result<()> {
        self.admit(run, None)
    }

    fn schedule_firing(&self, firing: Runnable, delay: Duration, handle: TaskHandle) -> Result<()> {
        self.target().schedule_tracked(firing, delay, handle)
    }
}

/// Schedule the first firing of `task` and return its handle.
pub(crate) fn start_recurrence<A: FiringAdmission>(
    admission: A,
    task: RecurringTask,
    initial_delay: Duration,
    period: Duration,
) -> Result<TaskResult<()>> {
    let handle = TaskResult::new();
    let recurrence = Arc::new(Recurrence {
        admission,
        task,
        period,
        handle: handle.clone(),
    });
    let first = Arc::clone(&recurrence).firing();
    recurrence
        .admission
        .schedule_firing(first, initial_delay, Arc::new(handle.clone()))?;
    Ok(handle)
}

/// One fixed-delay recurring task. Every firing goes through admission;
/// the next firing is scheduled only after the current run returns.
struct Recurrence<A: FiringAdmission> {
    admission: A,
    task: RecurringTask,
    period: Duration,
    handle: TaskResult<()>,
}

impl<A: FiringAdmission> Recurrence<A> {
    /// Thunk run by the target when the delay elapses.
    fn firing(self: Arc<Self>) -> Runnable {
        Box::new(move || {
            if self.handle.is_done() {
                return;
            }
            let run = Arc::clone(&self);
            if let Err(e) = self.admission.admit_firing(Box::new(move || run.run_once())) {
                warn!(error = %e, "recurring task could not be admitted");
                self.handle.cancel(false);
            }
        })
    }

    fn run_once(self: Arc<Self>) {
        // the first run claims the handle; later cancels report it started
        if !self.handle.mark_running() && self.handle.is_done() {
            return;
        }
        match catch_unwind(AssertUnwindSafe(|| (self.task)())) {
            Ok(()) => self.reschedule(),
            Err(payload) => {
                let err = panic_to_error(payload);
                warn!(error = %err, "recurring task failed, recurrence stopped");
                self.handle.fail(err);
            }
        }
    }

    fn reschedule(self: Arc<Self>) {
        if self.handle.is_done() {
            return;
        }
        let period = self.period;
        let handle: TaskHandle = Arc::new(self.handle.clone());
        let recurrence = Arc::clone(&self);
        if let Err(e) = self.admission.schedule_firing(recurrence.firing(), period, handle) {
            debug!(error = %e, "target refused next firing, recurrence stopped");
            self.handle.cancel(false);
        }
    }
}
