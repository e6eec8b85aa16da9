//! Executors that pass every task through a caller-supplied wrapper before
//! forwarding it.

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::executor::{Executor, RecurringTask, Runnable, Scheduler, TaskHandle};
use crate::future::TaskResult;

/// Wrapper applied to each task on its way to the target.
pub type InterceptFn = Arc<dyn Fn(Runnable) -> Runnable + Send + Sync>;

/// Forwards to `target`, intercepting every task first.
///
/// Tasks submitted through the extension traits are intercepted after they
/// were bound to their future, so the wrapper sees the future-completing
/// runnable and may run code around it.
pub struct TaskIntercepter<E> {
    target: E,
    intercept: InterceptFn,
}

impl<E> TaskIntercepter<E> {
    pub fn new<F>(target: E, intercept: F) -> Self
    where
        F: Fn(Runnable) -> Runnable + Send + Sync + 'static,
    {
        Self {
            target,
            intercept: Arc::new(intercept),
        }
    }

    pub fn target(&self) -> &E {
        &self.target
    }
}

impl<E: Executor> Executor for TaskIntercepter<E> {
    fn execute(&self, task: Runnable) -> Result<()> {
        self.target.execute((self.intercept)(task))
    }

    fn execute_tracked(&self, task: Runnable, future: TaskHandle) -> Result<()> {
        self.target.execute_tracked((self.intercept)(task), future)
    }
}

impl<E: Scheduler> Scheduler for TaskIntercepter<E> {
    fn schedule(&self, task: Runnable, delay: Duration) -> Result<()> {
        self.target.schedule((self.intercept)(task), delay)
    }

    fn schedule_tracked(&self, task: Runnable, delay: Duration, future: TaskHandle) -> Result<()> {
        self.target.schedule_tracked((self.intercept)(task), delay, future)
    }

    /// Each firing is intercepted separately.
    fn schedule_with_fixed_delay(
        &self,
        task: RecurringTask,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<TaskResult<()>> {
        let intercept = Arc::clone(&self.intercept);
        let firing: RecurringTask = Arc::new(move || {
            let task = Arc::clone(&task);
            let wrapped = intercept(Box::new(move || task()));
            wrapped();
        });
        self.target.schedule_with_fixed_delay(firing, initial_delay, period)
    }

    fn is_shutdown(&self) -> bool {
        self.target.is_shutdown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{SameThreadExecutor, SubmitterExecutor};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn wrapper_runs_around_each_task() {
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let wrap_log = Arc::clone(&log);
        let exec = TaskIntercepter::new(SameThreadExecutor, move |task: Runnable| -> Runnable {
            let log = Arc::clone(&wrap_log);
            Box::new(move || {
                log.lock().push("before");
                task();
                log.lock().push("after");
            })
        });

        let task_log = Arc::clone(&log);
        let result = exec.submit(move || task_log.lock().push("task")).unwrap();
        result.get().unwrap();
        assert_eq!(*log.lock(), vec!["before", "task", "after"]);
    }

    #[test]
    fn wrapper_can_replace_task() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let exec = TaskIntercepter::new(SameThreadExecutor, move |_task: Runnable| -> Runnable {
            let counter = Arc::clone(&counter);
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        });
        exec.execute(Box::new(|| panic!("original never runs"))).unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
