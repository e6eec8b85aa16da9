use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{Result, ThreadworkError};
use crate::exception::{handle_exception, run_guarded};
use crate::executor::{Executor, Runnable};

/// Coarse state of a [`TaskResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

enum State<T> {
    Pending,
    Completed(T),
    Failed(Arc<anyhow::Error>),
    Cancelled,
}

impl<T> State<T> {
    fn status(&self) -> FutureStatus {
        match self {
            State::Pending => FutureStatus::Pending,
            State::Completed(_) => FutureStatus::Completed,
            State::Failed(_) => FutureStatus::Failed,
            State::Cancelled => FutureStatus::Cancelled,
        }
    }
}

struct Listener {
    callback: Runnable,
    executor: Option<Arc<dyn Executor>>,
}

impl Listener {
    fn invoke(self) {
        match self.executor {
            Some(executor) => {
                if let Err(e) = executor.execute(self.callback) {
                    handle_exception(&anyhow::Error::new(e).context("listener executor rejected callback"));
                }
            }
            None => run_guarded(self.callback),
        }
    }
}

struct Cell<T> {
    state: State<T>,
    /// Set once a runner has claimed the task; cancellation after this point
    /// no longer prevents execution.
    running: bool,
    listeners: Vec<Listener>,
}

struct Inner<T> {
    cell: Mutex<Cell<T>>,
    done: Condvar,
}

/// Single-assignment, listener-observable completion cell.
///
/// Every submission returns one of these. Handles are cheap to clone and all
/// clones observe the same state. The first terminal transition wins; later
/// `complete`/`fail`/`cancel` calls are no-ops that return `false`.
pub struct TaskResult<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for TaskResult<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T: Send + 'static> Default for TaskResult<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> TaskResult<T> {
    /// A new pending result.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cell: Mutex::new(Cell {
                    state: State::Pending,
                    running: false,
                    listeners: Vec::new(),
                }),
                done: Condvar::new(),
            }),
        }
    }

    /// Resolve with `value`. Returns `false` if already terminal.
    pub fn complete(&self, value: T) -> bool {
        self.finish(State::Completed(value))
    }

    /// Resolve as failed with `cause`. Returns `false` if already terminal.
    pub fn fail(&self, cause: anyhow::Error) -> bool {
        self.finish(State::Failed(Arc::new(cause)))
    }

    /// Resolve as failed, sharing a cause already observed on another future.
    pub fn fail_shared(&self, cause: Arc<anyhow::Error>) -> bool {
        self.finish(State::Failed(cause))
    }

    /// Cancel the result.
    ///
    /// Returns `true` only when the task had not started running. A running
    /// task is never interrupted (`may_interrupt` is accepted for contract
    /// parity), but the result still reports `Cancelled` to every observer
    /// and whatever the task eventually produces is discarded.
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        let _ = may_interrupt;
        let (listeners, was_running) = {
            let mut cell = self.inner.cell.lock();
            if !matches!(cell.state, State::Pending) {
                return false;
            }
            cell.state = State::Cancelled;
            (std::mem::take(&mut cell.listeners), cell.running)
        };
        self.inner.done.notify_all();
        for listener in listeners {
            listener.invoke();
        }
        !was_running
    }

    /// Claim the task for execution. Returns `false` when the result was
    /// cancelled (or otherwise resolved) first, in which case the task body
    /// must be skipped.
    pub fn mark_running(&self) -> bool {
        let mut cell = self.inner.cell.lock();
        if matches!(cell.state, State::Pending) && !cell.running {
            cell.running = true;
            true
        } else {
            false
        }
    }

    fn finish(&self, state: State<T>) -> bool {
        let listeners = {
            let mut cell = self.inner.cell.lock();
            if !matches!(cell.state, State::Pending) {
                return false;
            }
            cell.state = state;
            std::mem::take(&mut cell.listeners)
        };
        self.inner.done.notify_all();
        for listener in listeners {
            listener.invoke();
        }
        true
    }

    pub fn status(&self) -> FutureStatus {
        self.inner.cell.lock().state.status()
    }

    pub fn is_done(&self) -> bool {
        self.status() != FutureStatus::Pending
    }

    pub fn is_cancelled(&self) -> bool {
        self.status() == FutureStatus::Cancelled
    }

    /// The failure cause, when the result failed.
    pub fn failure_cause(&self) -> Option<Arc<anyhow::Error>> {
        match &self.inner.cell.lock().state {
            State::Failed(cause) => Some(Arc::clone(cause)),
            _ => None,
        }
    }

    /// Run `listener` once this result is terminal. If it already is, the
    /// listener runs on the calling thread before this returns.
    pub fn add_listener<F>(&self, listener: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.push_listener(Listener {
            callback: Box::new(listener),
            executor: None,
        });
    }

    /// Like [`add_listener`](Self::add_listener), but the callback is handed to
    /// `executor` instead of running inline.
    pub fn add_listener_on<F>(&self, listener: F, executor: Arc<dyn Executor>)
    where
        F: FnOnce() + Send + 'static,
    {
        self.push_listener(Listener {
            callback: Box::new(listener),
            executor: Some(executor),
        });
    }

    fn push_listener(&self, listener: Listener) {
        {
            let mut cell = self.inner.cell.lock();
            if matches!(cell.state, State::Pending) {
                cell.listeners.push(listener);
                return;
            }
        }
        listener.invoke();
    }

    /// Listener that receives this result once terminal, without the stored
    /// listener keeping the result alive.
    pub fn add_done_callback<F>(&self, callback: F)
    where
        F: FnOnce(&TaskResult<T>) + Send + 'static,
    {
        let weak: Weak<Inner<T>> = Arc::downgrade(&self.inner);
        self.add_listener(move || {
            if let Some(inner) = weak.upgrade() {
                callback(&TaskResult { inner });
            }
        });
    }

    pub fn len_listeners(&self) -> usize {
        self.inner.cell.lock().listeners.len()
    }
}

impl<T: Clone + Send + 'static> TaskResult<T> {
    fn outcome(state: &State<T>) -> Option<Result<T>> {
        match state {
            State::Pending => None,
            State::Completed(value) => Some(Ok(value.clone())),
            State::Failed(cause) => Some(Err(ThreadworkError::ExecutionFailure(Arc::clone(cause)))),
            State::Cancelled => Some(Err(ThreadworkError::Cancelled)),
        }
    }

    /// Block until terminal and return the value or the failure.
    pub fn get(&self) -> Result<T> {
        let mut cell = self.inner.cell.lock();
        loop {
            if let Some(outcome) = Self::outcome(&cell.state) {
                return outcome;
            }
            self.inner.done.wait(&mut cell);
        }
    }

    /// Block for at most `timeout`. Expiry leaves the result untouched.
    /// A timeout too large to represent waits without limit.
    pub fn get_timeout(&self, timeout: Duration) -> Result<T> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.get();
        };
        let mut cell = self.inner.cell.lock();
        loop {
            if let Some(outcome) = Self::outcome(&cell.state) {
                return outcome;
            }
            if self.inner.done.wait_until(&mut cell, deadline).timed_out() {
                return Self::outcome(&cell.state).unwrap_or(Err(ThreadworkError::Timeout(timeout)));
            }
        }
    }

    /// Non-blocking read; `None` while pending.
    pub fn try_get(&self) -> Option<Result<T>> {
        Self::outcome(&self.inner.cell.lock().state)
    }

    /// Listener receiving the outcome.
    pub fn add_callback<F>(&self, callback: F)
    where
        F: FnOnce(Result<T>) + Send + 'static,
    {
        self.add_done_callback(move |result| {
            if let Some(outcome) = result.try_get() {
                callback(outcome);
            }
        });
    }
}

impl<T> fmt::Debug for TaskResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cell = self.inner.cell.lock();
        f.debug_struct("TaskResult")
            .field("status", &cell.state.status())
            .field("running", &cell.running)
            .field("listeners", &cell.listeners.len())
            .finish()
    }
}

/// Object-safe view of a result, used where the value type is erased (queued
/// tasks, shutdown lists, admission queues).
pub trait ListenableFuture: Send + Sync {
    fn cancel(&self, may_interrupt: bool) -> bool;
    fn is_cancelled(&self) -> bool;
    fn is_done(&self) -> bool;
    fn add_listener(&self, listener: Runnable);
    fn add_listener_on(&self, listener: Runnable, executor: Arc<dyn Executor>);
}

impl<T: Send + 'static> ListenableFuture for TaskResult<T> {
    fn cancel(&self, may_interrupt: bool) -> bool {
        TaskResult::cancel(self, may_interrupt)
    }

    fn is_cancelled(&self) -> bool {
        TaskResult::is_cancelled(self)
    }

    fn is_done(&self) -> bool {
        TaskResult::is_done(self)
    }

    fn add_listener(&self, listener: Runnable) {
        TaskResult::add_listener(self, listener)
    }

    fn add_listener_on(&self, listener: Runnable, executor: Arc<dyn Executor>) {
        TaskResult::add_listener_on(self, listener, executor)
    }
}
