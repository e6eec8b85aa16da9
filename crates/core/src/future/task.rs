use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::exception::panic_to_error;
use crate::executor::Runnable;

use super::result::TaskResult;

type Body<T> = Box<dyn FnOnce() -> anyhow::Result<T> + Send>;

/// A task body bound to the [`TaskResult`] it completes.
///
/// Running it claims the result first; a result cancelled before that point
/// means the body is never invoked. Panics and `Err` returns both resolve the
/// result as failed, so they never reach the thread that ran the task.
pub struct FutureTask<T> {
    body: Body<T>,
    result: TaskResult<T>,
}

impl<T: Send + 'static> FutureTask<T> {
    pub fn new<F>(task: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Self::from_fallible(move || Ok(task()))
    }

    pub fn from_fallible<F>(task: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        Self {
            body: Box::new(task),
            result: TaskResult::new(),
        }
    }

    pub fn result(&self) -> TaskResult<T> {
        self.result.clone()
    }

    pub fn run(self) {
        if !self.result.mark_running() {
            return;
        }
        match catch_unwind(AssertUnwindSafe(self.body)) {
            Ok(Ok(value)) => {
                self.result.complete(value);
            }
            Ok(Err(cause)) => {
                self.result.fail(cause);
            }
            Err(payload) => {
                self.result.fail(panic_to_error(payload));
            }
        }
    }

    /// Split into a type-erased runnable and the result it completes.
    pub fn into_runnable(self) -> (Runnable, TaskResult<T>) {
        let result = self.result();
        (Box::new(move || self.run()), result)
    }
}
