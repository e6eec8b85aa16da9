//! Admission control over a shared executor.
//!
//! [`ExecutorLimiter`] forwards at most `max_concurrency` tasks to its target
//! at a time and holds the rest in a FIFO queue. Each forwarded task carries
//! an admission slot; the slot is released when the task finishes or is
//! dropped unrun, which frees capacity and drains the queue.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use threadwork_core::naming::run_named;
use threadwork_core::{Executor, Result, Runnable, TaskHandle, ThreadworkError};
use tracing::{debug, warn};

// ── Admission state ──────────────────────────────────────────────────

struct Waiting {
    id: u64,
    task: Runnable,
    future: Option<TaskHandle>,
    /// True while the task sits in the queue. Shared with the future's
    /// removal listener, which skips the queue scan once this is cleared.
    queued: Arc<AtomicBool>,
}

struct AdmissionState {
    running: usize,
    waiting: VecDeque<Waiting>,
}

pub(crate) struct LimiterInner<E> {
    target: E,
    max_concurrency: usize,
    name: Option<Arc<str>>,
    state: Mutex<AdmissionState>,
    /// Held by whichever thread is currently forwarding queued tasks.
    drain: Mutex<()>,
    next_id: AtomicU64,
}

/// Capacity held by one admitted task. Dropping it frees the slot.
struct AdmissionSlot<E: Executor + 'static> {
    inner: Arc<LimiterInner<E>>,
}

impl<E: Executor + 'static> Drop for AdmissionSlot<E> {
    fn drop(&mut self) {
        self.inner.state.lock().running -= 1;
        self.inner.drain();
    }
}

impl<E: Executor + 'static> LimiterInner<E> {
    pub(crate) fn target(&self) -> &E {
        &self.target
    }

    /// Admit `task` now if a slot is free and nobody is waiting, otherwise
    /// queue it. Only an immediate forward can fail synchronously.
    pub(crate) fn admit(self: &Arc<Self>, task: Runnable, future: Option<TaskHandle>) -> Result<()> {
        let mut state = self.state.lock();
        if state.running < self.max_concurrency && state.waiting.is_empty() {
            state.running += 1;
            drop(state);
            return self.forward(task, future);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let queued = Arc::new(AtomicBool::new(true));
        state.waiting.push_back(Waiting {
            id,
            task,
            future: future.clone(),
            queued: Arc::clone(&queued),
        });
        drop(state);

        debug!(id, limiter = ?self.name, "task queued for admission");
        if let Some(future) = future {
            // a queued task whose future resolves early is dropped from the queue
            let weak: Weak<Self> = Arc::downgrade(self);
            future.add_listener(Box::new(move || {
                if !queued.load(Ordering::Acquire) {
                    return;
                }
                if let Some(inner) = weak.upgrade() {
                    inner.remove_waiting(id);
                }
            }));
        }
        self.drain();
        Ok(())
    }

    fn remove_waiting(&self, id: u64) {
        let removed = {
            let mut state = self.state.lock();
            match state.waiting.iter().position(|w| w.id == id) {
                Some(pos) => state.waiting.remove(pos),
                None => None,
            }
        };
        if removed.is_some() {
            debug!(id, "cancelled task removed from admission queue");
        }
        // dropped here, outside the state lock
        drop(removed);
    }

    /// Forward an already-counted task to the target.
    fn forward(self: &Arc<Self>, task: Runnable, future: Option<TaskHandle>) -> Result<()> {
        let slot = AdmissionSlot {
            inner: Arc::clone(self),
        };
        let name = self.name.clone();
        let wrapped: Runnable = Box::new(move || {
            let _slot = slot;
            match name {
                Some(name) => run_named(&name, task),
                None => task(),
            }
        });
        match future {
            Some(future) => self.target.execute_tracked(wrapped, future),
            None => self.target.execute(wrapped),
        }
    }

    /// Forward queued tasks, FIFO, while capacity allows.
    ///
    /// One drainer at a time. A caller that finds the drain section busy
    /// returns immediately; the active drainer re-checks the queue after
    /// releasing the section so that work is never stranded.
    pub(crate) fn drain(self: &Arc<Self>) {
        loop {
            let Some(section) = self.drain.try_lock() else {
                return;
            };
            loop {
                let next = {
                    let mut state = self.state.lock();
                    if state.running < self.max_concurrency {
                        let next = state.waiting.pop_front();
                        if let Some(waiting) = &next {
                            waiting.queued.store(false, Ordering::Release);
                            state.running += 1;
                        }
                        next
                    } else {
                        None
                    }
                };
                let Some(Waiting { id, task, future, .. }) = next else {
                    break;
                };
                if let Err(e) = self.forward(task, future.clone()) {
                    warn!(id, error = %e, "target rejected queued task");
                    if let Some(future) = future {
                        future.cancel(false);
                    }
                }
            }
            drop(section);

            let state = self.state.lock();
            if state.running >= self.max_concurrency || state.waiting.is_empty() {
                return;
            }
        }
    }
}

// ── ExecutorLimiter ──────────────────────────────────────────────────

/// Caps how many tasks submitted through it run concurrently on `target`.
///
/// Tasks beyond the cap wait in FIFO order and are forwarded as running
/// ones finish. No threads are created; the target does all execution.
pub struct ExecutorLimiter<E: Executor + 'static> {
    pub(crate) inner: Arc<LimiterInner<E>>,
}

impl<E: Executor + 'static> Clone for ExecutorLimiter<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Executor + 'static> ExecutorLimiter<E> {
    pub fn new(target: E, max_concurrency: usize) -> Result<Self> {
        Self::build(target, max_concurrency, None)
    }

    /// Like [`new`](Self::new), with tasks run under the logical sub-pool
    /// name `name`.
    pub fn with_name(target: E, max_concurrency: usize, name: impl Into<String>) -> Result<Self> {
        Self::build(target, max_concurrency, Some(Arc::from(name.into())))
    }

    fn build(target: E, max_concurrency: usize, name: Option<Arc<str>>) -> Result<Self> {
        if max_concurrency == 0 {
            return Err(ThreadworkError::invalid_argument("max_concurrency must be greater than zero"));
        }
        Ok(Self::unchecked(target, max_concurrency, name))
    }

    /// Caller guarantees `max_concurrency > 0`.
    pub(crate) fn unchecked(target: E, max_concurrency: usize, name: Option<Arc<str>>) -> Self {
        Self {
            inner: Arc::new(LimiterInner {
                target,
                max_concurrency,
                name,
                state: Mutex::new(AdmissionState {
                    running: 0,
                    waiting: VecDeque::new(),
                }),
                drain: Mutex::new(()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn target(&self) -> &E {
        self.inner.target()
    }

    pub fn max_concurrency(&self) -> usize {
        self.inner.max_concurrency
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Tasks forwarded to the target and not yet finished.
    pub fn current_running_count(&self) -> usize {
        self.inner.state.lock().running
    }

    /// Tasks waiting for admission.
    pub fn unsubmitted_task_count(&self) -> usize {
        self.inner.state.lock().waiting.len()
    }
}

impl<E: Executor + 'static> Executor for ExecutorLimiter<E> {
    fn execute(&self, task: Runnable) -> Result<()> {
        self.inner.admit(task, None)
    }

    fn execute_tracked(&self, task: Runnable, future: TaskHandle) -> Result<()> {
        self.inner.admit(task, Some(future))
    }
}

impl<E: Executor + 'static> fmt::Debug for ExecutorLimiter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ExecutorLimiter")
            .field("name", &self.inner.name)
            .field("max_concurrency", &self.inner.max_concurrency)
            .field("running", &state.running)
            .field("waiting", &state.waiting.len())
            .finish()
    }
}
