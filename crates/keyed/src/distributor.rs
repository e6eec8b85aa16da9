use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use threadwork_core::exception::run_guarded;
use threadwork_core::{
    Executor, FutureTask, Result, Runnable, Scheduler, TaskHandle, TaskResult,
};
use tracing::{debug, warn};

use crate::builder::{KeyDistributedBuilder, DEFAULT_LOCK_STRIPES, DEFAULT_MAX_TASKS_PER_CYCLE};
use crate::stripes::Stripes;
use crate::submitter::KeySubmitter;

// ── Key state ────────────────────────────────────────────────────────

struct QueuedTask {
    task: Runnable,
    future: Option<TaskHandle>,
}

/// Pending work for one key. An entry exists exactly while a worker for
/// the key is submitted to the target or running on it.
struct KeyState {
    queue: VecDeque<QueuedTask>,
    /// A task for this key is mid-run. Only maintained in accurate mode.
    in_flight: bool,
}

struct Inner<K, E> {
    target: E,
    stripes: Stripes<K, KeyState>,
    accurate_queue_size: bool,
    max_tasks_per_cycle: usize,
}

enum Step {
    Run(QueuedTask),
    Yield,
    Done,
}

impl<K, E> Inner<K, E>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    E: Executor + 'static,
{
    /// Queue `task` behind whatever is pending for `key`, starting a worker
    /// when the key was idle.
    fn enqueue(self: &Arc<Self>, key: K, task: QueuedTask) -> Result<()> {
        let start = {
            let mut stripe = self.stripes.for_key(&key).lock();
            match stripe.get_mut(&key) {
                Some(state) => {
                    state.queue.push_back(task);
                    false
                }
                None => {
                    stripe.insert(
                        key.clone(),
                        KeyState {
                            queue: VecDeque::from([task]),
                            in_flight: false,
                        },
                    );
                    true
                }
            }
        };
        if start {
            debug!(key = ?key, "starting key worker");
            self.hand_off(key)?;
        }
        Ok(())
    }

    /// Submit the worker for `key` to the target. On refusal every task
    /// queued for the key is abandoned.
    fn hand_off(self: &Arc<Self>, key: K) -> Result<()> {
        let worker = KeyWorker {
            inner: Arc::clone(self),
            key: Some(key.clone()),
        };
        let result = self.target.execute(Box::new(move || worker.run()));
        if let Err(e) = &result {
            warn!(key = ?key, error = %e, "target refused key worker");
        }
        result
    }

    fn run_worker(self: &Arc<Self>, key: K) {
        let mut ran = 0;
        loop {
            let step = {
                let mut stripe = self.stripes.for_key(&key).lock();
                match stripe.get_mut(&key) {
                    None => Step::Done,
                    Some(state) => {
                        state.in_flight = false;
                        if state.queue.is_empty() {
                            stripe.remove(&key);
                            Step::Done
                        } else if ran >= self.max_tasks_per_cycle {
                            Step::Yield
                        } else {
                            match state.queue.pop_front() {
                                Some(next) => {
                                    state.in_flight = self.accurate_queue_size;
                                    Step::Run(next)
                                }
                                None => Step::Done,
                            }
                        }
                    }
                }
            };
            match step {
                Step::Run(next) => {
                    run_guarded(next.task);
                    ran += 1;
                }
                Step::Yield => {
                    // the failure path has already abandoned the key
                    let _ = self.hand_off(key);
                    return;
                }
                Step::Done => return,
            }
        }
    }

    /// Drop the entry for `key` along with any queued tasks, cancelling
    /// their futures. Used when no worker will ever run them.
    fn abandon(&self, key: &K) {
        let removed = self.stripes.for_key(key).lock().remove(key);
        let Some(state) = removed else {
            return;
        };
        let dropped = state.queue.len();
        for queued in state.queue {
            if let Some(future) = queued.future {
                future.cancel(false);
            }
        }
        if dropped > 0 {
            warn!(key = ?key, dropped, "abandoned queued tasks for key");
        }
    }
}

/// A key's worker as handed to the target. If the target drops it without
/// running it, the key is abandoned rather than left stranded.
struct KeyWorker<K, E>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    E: Executor + 'static,
{
    inner: Arc<Inner<K, E>>,
    key: Option<K>,
}

impl<K, E> KeyWorker<K, E>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    E: Executor + 'static,
{
    fn run(mut self) {
        if let Some(key) = self.key.take() {
            self.inner.run_worker(key);
        }
    }
}

impl<K, E> Drop for KeyWorker<K, E>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    E: Executor + 'static,
{
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.inner.abandon(&key);
        }
    }
}

// ── KeyDistributedExecutor ───────────────────────────────────────────

/// Runs tasks sharing a key strictly one after another, in submission
/// order, while different keys proceed in parallel on `target`.
///
/// A key with pending work owns a single worker on the target. The worker
/// pops tasks under the key's stripe lock and runs them outside it; when
/// the queue empties the key's entry is removed.
pub struct KeyDistributedExecutor<K, E> {
    inner: Arc<Inner<K, E>>,
}

impl<K, E> Clone for KeyDistributedExecutor<K, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, E> KeyDistributedExecutor<K, E>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    E: Executor + 'static,
{
    pub fn new(target: E) -> Self {
        Self::from_parts(target, DEFAULT_LOCK_STRIPES, false, DEFAULT_MAX_TASKS_PER_CYCLE)
    }

    pub fn builder(target: E) -> KeyDistributedBuilder<K, E> {
        KeyDistributedBuilder::new(target)
    }

    pub(crate) fn from_parts(
        target: E,
        lock_stripes: usize,
        accurate_queue_size: bool,
        max_tasks_per_cycle: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                target,
                stripes: Stripes::new(lock_stripes),
                accurate_queue_size,
                max_tasks_per_cycle,
            }),
        }
    }

    pub fn target(&self) -> &E {
        &self.inner.target
    }

    pub fn lock_stripes(&self) -> usize {
        self.inner.stripes.len()
    }

    pub fn max_tasks_per_cycle(&self) -> usize {
        self.inner.max_tasks_per_cycle
    }

    pub fn execute<F>(&self, key: K, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.execute_runnable(key, Box::new(task), None)
    }

    pub fn submit_task<T, F>(&self, key: K, task: F) -> Result<TaskResult<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.submit_future(key, FutureTask::new(task))
    }

    /// Like [`submit_task`](Self::submit_task) for a body that can fail.
    pub fn submit_task_callable<T, F>(&self, key: K, task: F) -> Result<TaskResult<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        self.submit_future(key, FutureTask::from_fallible(task))
    }

    fn submit_future<T: Send + 'static>(&self, key: K, task: FutureTask<T>) -> Result<TaskResult<T>> {
        let (runnable, result) = task.into_runnable();
        self.execute_runnable(key, runnable, Some(Arc::new(result.clone())))?;
        Ok(result)
    }

    pub(crate) fn execute_runnable(&self, key: K, task: Runnable, future: Option<TaskHandle>) -> Result<()> {
        self.inner.enqueue(key, QueuedTask { task, future })
    }

    /// An [`Executor`] that submits everything under `key`.
    pub fn submitter_for_key(&self, key: K) -> KeySubmitter<K, E> {
        KeySubmitter::new(self.clone(), key)
    }

    /// Tasks pending for `key`. In accurate mode the running task counts too.
    pub fn task_queue_size(&self, key: &K) -> usize {
        self.inner
            .stripes
            .for_key(key)
            .lock()
            .get(key)
            .map_or(0, |state| self.pending(state))
    }

    /// Pending counts for every key that has any.
    pub fn task_queue_size_map(&self) -> HashMap<K, usize> {
        let mut sizes = HashMap::new();
        for stripe in self.inner.stripes.iter() {
            for (key, state) in stripe.lock().iter() {
                let pending = self.pending(state);
                if pending > 0 {
                    sizes.insert(key.clone(), pending);
                }
            }
        }
        sizes
    }

    fn pending(&self, state: &KeyState) -> usize {
        state.queue.len() + usize::from(self.inner.accurate_queue_size && state.in_flight)
    }
}

impl<K, E> KeyDistributedExecutor<K, E>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    E: Scheduler + 'static,
{
    /// Queue `task` under `key` once `delay` has elapsed. Ordering against
    /// other tasks for the key is decided at that point.
    pub fn schedule_task<F>(&self, key: K, task: F, delay: Duration) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if delay.is_zero() {
            return self.execute(key, task);
        }
        let inner = Arc::clone(&self.inner);
        self.inner.target.schedule(
            Box::new(move || {
                let queued = QueuedTask {
                    task: Box::new(task),
                    future: None,
                };
                if let Err(e) = inner.enqueue(key, queued) {
                    warn!(error = %e, "delayed keyed task could not be queued");
                }
            }),
            delay,
        )
    }

    pub fn submit_scheduled_task<T, F>(&self, key: K, task: F, delay: Duration) -> Result<TaskResult<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if delay.is_zero() {
            return self.submit_task(key, task);
        }
        let (runnable, result) = FutureTask::new(task).into_runnable();
        let handle: TaskHandle = Arc::new(result.clone());
        let inner = Arc::clone(&self.inner);
        let tracked = Arc::clone(&handle);
        self.inner.target.schedule_tracked(
            Box::new(move || {
                let queued = QueuedTask {
                    task: runnable,
                    future: Some(Arc::clone(&tracked)),
                };
                if let Err(e) = inner.enqueue(key, queued) {
                    warn!(error = %e, "delayed keyed task could not be queued");
                    tracked.cancel(false);
                }
            }),
            delay,
            handle,
        )?;
        Ok(result)
    }
}

impl<K, E> fmt::Debug for KeyDistributedExecutor<K, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyDistributedExecutor")
            .field("lock_stripes", &self.inner.stripes.len())
            .field("accurate_queue_size", &self.inner.accurate_queue_size)
            .field("max_tasks_per_cycle", &self.inner.max_tasks_per_cycle)
            .finish()
    }
}
