use std::fmt;
use std::time::{Duration, Instant};

use threadwork_core::exception::run_guarded;
use threadwork_core::{RecurringTask, Runnable, TaskHandle, TaskResult};

use super::types::Priority;

/// Furthest a run time is ever placed from now. Longer delays are clamped
/// to it so that very large durations cannot overflow [`Instant`].
const MAX_DELAY: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// The instant `delay` after `now`, clamped to [`MAX_DELAY`].
pub(crate) fn run_time_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay.min(MAX_DELAY)).unwrap_or(now)
}

pub(crate) enum TaskKind {
    OneTime(Runnable),
    /// Fixed-delay recurrence. `handle` is the caller-visible future; once it
    /// is terminal the task stops recurring.
    Recurring {
        task: RecurringTask,
        period: Duration,
        handle: TaskResult<()>,
    },
}

/// One unit of queued work, owned by the queue until a worker dequeues it.
pub(crate) struct TaskWrapper {
    pub(crate) id: u64,
    pub(crate) priority: Priority,
    pub(crate) run_time: Instant,
    pub(crate) kind: TaskKind,
    /// Future completed by a one-time task, when the submitter tracked one.
    pub(crate) future: Option<TaskHandle>,
}

impl TaskWrapper {
    pub(crate) fn one_time(
        id: u64,
        priority: Priority,
        run_time: Instant,
        task: Runnable,
        future: Option<TaskHandle>,
    ) -> Self {
        Self {
            id,
            priority,
            run_time,
            kind: TaskKind::OneTime(task),
            future,
        }
    }

    pub(crate) fn recurring(
        id: u64,
        priority: Priority,
        run_time: Instant,
        task: RecurringTask,
        period: Duration,
        handle: TaskResult<()>,
    ) -> Self {
        Self {
            id,
            priority,
            run_time,
            kind: TaskKind::Recurring { task, period, handle },
            future: None,
        }
    }

    /// A cancelled wrapper is discarded at dequeue and never runs.
    pub(crate) fn is_cancelled(&self) -> bool {
        match &self.kind {
            TaskKind::Recurring { handle, .. } => handle.is_done(),
            TaskKind::OneTime(_) => self.future.as_ref().is_some_and(|f| f.is_cancelled()),
        }
    }

    pub(crate) fn is_recurring(&self) -> bool {
        matches!(self.kind, TaskKind::Recurring { .. })
    }

    /// Cancel whichever future this wrapper reports to.
    pub(crate) fn cancel(&self) -> bool {
        match &self.kind {
            TaskKind::Recurring { handle, .. } => handle.cancel(false),
            TaskKind::OneTime(_) => self.future.as_ref().is_some_and(|f| f.cancel(false)),
        }
    }
}

impl fmt::Debug for TaskWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskWrapper")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("run_time", &self.run_time)
            .field("recurring", &self.is_recurring())
            .finish()
    }
}

/// A task that was still queued when [`shutdown_now`] drained the scheduler.
///
/// [`shutdown_now`]: crate::PriorityScheduler::shutdown_now
#[derive(Debug)]
pub struct UnrunTask {
    inner: TaskWrapper,
}

impl UnrunTask {
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn priority(&self) -> Priority {
        self.inner.priority
    }

    pub fn is_recurring(&self) -> bool {
        self.inner.is_recurring()
    }

    /// Future associated with the task, if it was submitted with one.
    pub fn future(&self) -> Option<TaskHandle> {
        match &self.inner.kind {
            TaskKind::Recurring { handle, .. } => Some(std::sync::Arc::new(handle.clone())),
            TaskKind::OneTime(_) => self.inner.future.clone(),
        }
    }

    /// Cancel the associated future. Returns `false` when there is none or it
    /// was already terminal.
    pub fn cancel(&self) -> bool {
        self.inner.cancel()
    }

    /// Run the task once on the calling thread. Panics are routed to the
    /// process-wide exception handler.
    pub fn run(self) {
        match self.inner.kind {
            TaskKind::OneTime(task) => run_guarded(task),
            TaskKind::Recurring { task, .. } => run_guarded(|| task()),
        }
    }
}

impl From<TaskWrapper> for UnrunTask {
    fn from(inner: TaskWrapper) -> Self {
        Self { inner }
    }
}
