use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use threadwork_core::{
    Executor, FutureTask, Result, Runnable, Scheduler, TaskHandle, TaskResult, ThreadworkError,
};
use tracing::{debug, warn};

use crate::limiter::ExecutorLimiter;
use crate::scheduler_limiter::{start_recurrence, FiringAdmission};

struct KeyEntry<E: Executor + 'static> {
    limiter: ExecutorLimiter<Arc<E>>,
    /// Tasks accepted for this key that have not finished or been dropped.
    outstanding: usize,
}

struct KeyedInner<K, E: Executor + 'static> {
    target: Arc<E>,
    max_concurrency_per_key: usize,
    sub_pool_name: Option<String>,
    limiters: Mutex<HashMap<K, KeyEntry<E>>>,
}

/// Releases one outstanding task for `key`, dropping the key's limiter
/// once nothing is left for it.
struct KeyTicket<K: Eq + Hash, E: Executor + 'static> {
    inner: Arc<KeyedInner<K, E>>,
    key: Option<K>,
}

impl<K: Eq + Hash, E: Executor + 'static> Drop for KeyTicket<K, E> {
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        let removed = {
            let mut limiters = self.inner.limiters.lock();
            let idle = match limiters.get_mut(&key) {
                Some(entry) => {
                    entry.outstanding -= 1;
                    entry.outstanding == 0
                }
                None => false,
            };
            if idle {
                limiters.remove(&key)
            } else {
                None
            }
        };
        drop(removed);
    }
}

/// Per-key concurrency limit over one shared target.
///
/// Each key gets its own [`ExecutorLimiter`], created on first use and
/// discarded once every task for the key has finished. Over a
/// [`Scheduler`] target, delayed and recurring tasks are admitted under
/// their key when they fire, not when they are scheduled.
pub struct KeyedLimiter<K, E: Executor + 'static> {
    inner: Arc<KeyedInner<K, E>>,
}

impl<K, E: Executor + 'static> Clone for KeyedLimiter<K, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, E> KeyedLimiter<K, E>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    E: Executor + 'static,
{
    pub fn new(target: E, max_concurrency_per_key: usize) -> Result<Self> {
        Self::build(target, max_concurrency_per_key, None)
    }

    /// Tasks for key `k` run under the logical sub-pool name `{name}-{k:?}`.
    pub fn with_sub_pool_name(target: E, max_concurrency_per_key: usize, name: impl Into<String>) -> Result<Self> {
        Self::build(target, max_concurrency_per_key, Some(name.into()))
    }

    fn build(target: E, max_concurrency_per_key: usize, sub_pool_name: Option<String>) -> Result<Self> {
        if max_concurrency_per_key == 0 {
            return Err(ThreadworkError::invalid_argument(
                "max_concurrency_per_key must be greater than zero",
            ));
        }
        Ok(Self {
            inner: Arc::new(KeyedInner {
                target: Arc::new(target),
                max_concurrency_per_key,
                sub_pool_name,
                limiters: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn max_concurrency_per_key(&self) -> usize {
        self.inner.max_concurrency_per_key
    }

    /// Keys with at least one task queued or running.
    pub fn tracked_key_count(&self) -> usize {
        self.inner.limiters.lock().len()
    }

    /// Tasks for `key` waiting for admission.
    pub fn unsubmitted_task_count(&self, key: &K) -> usize {
        self.inner
            .limiters
            .lock()
            .get(key)
            .map_or(0, |entry| entry.limiter.unsubmitted_task_count())
    }

    /// Waiting task counts for every key that has any.
    pub fn unsubmitted_task_count_map(&self) -> HashMap<K, usize> {
        self.inner
            .limiters
            .lock()
            .iter()
            .filter_map(|(key, entry)| {
                let waiting = entry.limiter.unsubmitted_task_count();
                (waiting > 0).then(|| (key.clone(), waiting))
            })
            .collect()
    }

    pub fn execute<F>(&self, key: K, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.dispatch(key, Box::new(task), None)
    }

    pub fn submit<T, F>(&self, key: K, task: F) -> Result<TaskResult<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.submit_task(key, FutureTask::new(task))
    }

    pub fn submit_callable<T, F>(&self, key: K, task: F) -> Result<TaskResult<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        self.submit_task(key, FutureTask::from_fallible(task))
    }

    fn submit_task<T: Send + 'static>(&self, key: K, task: FutureTask<T>) -> Result<TaskResult<T>> {
        let (runnable, result) = task.into_runnable();
        self.dispatch(key, runnable, Some(Arc::new(result.clone())))?;
        Ok(result)
    }

    fn dispatch(&self, key: K, task: Runnable, future: Option<TaskHandle>) -> Result<()> {
        let limiter = {
            let mut limiters = self.inner.limiters.lock();
            let entry = limiters.entry(key.clone()).or_insert_with(|| {
                debug!(key = ?key, "creating limiter for key");
                let name = self
                    .inner
                    .sub_pool_name
                    .as_ref()
                    .map(|prefix| Arc::from(format!("{}-{:?}", prefix, key)));
                KeyEntry {
                    limiter: ExecutorLimiter::unchecked(
                        Arc::clone(&self.inner.target),
                        self.inner.max_concurrency_per_key,
                        name,
                    ),
                    outstanding: 0,
                }
            });
            entry.outstanding += 1;
            entry.limiter.clone()
        };

        let ticket = KeyTicket {
            inner: Arc::clone(&self.inner),
            key: Some(key),
        };
        let wrapped: Runnable = Box::new(move || {
            let _ticket = ticket;
            task();
        });
        match future {
            Some(future) => limiter.execute_tracked(wrapped, future),
            None => limiter.execute(wrapped),
        }
    }
}

impl<K, E> KeyedLimiter<K, E>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    E: Scheduler + 'static,
{
    /// Run `task` under `key` once `delay` has elapsed.
    pub fn schedule<F>(&self, key: K, task: F, delay: Duration) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_admission(key, Box::new(task), delay, None)
    }

    pub fn submit_scheduled<T, F>(&self, key: K, task: F, delay: Duration) -> Result<TaskResult<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.submit_scheduled_task(key, FutureTask::new(task), delay)
    }

    pub fn submit_scheduled_callable<T, F>(&self, key: K, task: F, delay: Duration) -> Result<TaskResult<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        self.submit_scheduled_task(key, FutureTask::from_fallible(task), delay)
    }

    /// Run `task` under `key` after `initial_delay`, then `period` after each
    /// run finishes. Every firing competes for the key's capacity on its own.
    pub fn schedule_with_fixed_delay<F>(
        &self,
        key: K,
        task: F,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<TaskResult<()>>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let admission = KeyedFiring {
            limiter: self.clone(),
            key,
        };
        start_recurrence(admission, Arc::new(task), initial_delay, period)
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.target.is_shutdown()
    }

    fn submit_scheduled_task<T: Send + 'static>(
        &self,
        key: K,
        task: FutureTask<T>,
        delay: Duration,
    ) -> Result<TaskResult<T>> {
        let (runnable, result) = task.into_runnable();
        self.schedule_admission(key, runnable, delay, Some(Arc::new(result.clone())))?;
        Ok(result)
    }

    fn schedule_admission(&self, key: K, task: Runnable, delay: Duration, future: Option<TaskHandle>) -> Result<()> {
        if delay.is_zero() {
            return self.dispatch(key, task, future);
        }
        let limiter = self.clone();
        let tracked = future.clone();
        let thunk: Runnable = Box::new(move || {
            if let Err(e) = limiter.dispatch(key.clone(), task, tracked.clone()) {
                warn!(key = ?key, error = %e, "delayed task could not be admitted");
                if let Some(future) = tracked {
                    future.cancel(false);
                }
            }
        });
        match future {
            Some(future) => self.inner.target.schedule_tracked(thunk, delay, future),
            None => self.inner.target.schedule(thunk, delay),
        }
    }
}

/// Firings of one key's recurring task, admitted under that key.
struct KeyedFiring<K, E: Executor + 'static> {
    limiter: KeyedLimiter<K, E>,
    key: K,
}

impl<K, E> FiringAdmission for KeyedFiring<K, E>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    E: Scheduler + 'static,
{
    fn admit_firing(&self, run: Runnable) -> Result<()> {
        self.limiter.dispatch(self.key.clone(), run, None)
    }

    fn schedule_firing(&self, firing: Runnable, delay: Duration, handle: TaskHandle) -> Result<()> {
        self.limiter.inner.target.schedule_tracked(firing, delay, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct Parking {
        tasks: Mutex<VecDeque<Runnable>>,
    }

    impl Executor for Parking {
        fn execute(&self, task: Runnable) -> Result<()> {
            self.tasks.lock().push_back(task);
            Ok(())
        }
    }

    fn run_all(limiter: &KeyedLimiter<&'static str, Parking>) {
        loop {
            let task = limiter.inner.target.tasks.lock().pop_front();
            match task {
                Some(task) => task(),
                None => break,
            }
        }
    }

    #[test]
    fn limits_each_key_independently() {
        let limiter = KeyedLimiter::new(Parking::default(), 1).unwrap();
        for _ in 0..3 {
            limiter.execute("a", || {}).unwrap();
            limiter.execute("b", || {}).unwrap();
        }
        // one running per key, two waiting per key
        assert_eq!(limiter.inner.target.tasks.lock().len(), 2);
        assert_eq!(limiter.unsubmitted_task_count(&"a"), 2);
        assert_eq!(limiter.unsubmitted_task_count(&"b"), 2);
        let map = limiter.unsubmitted_task_count_map();
        assert_eq!(map.len(), 2);
        assert_eq!(map[&"a"], 2);

        run_all(&limiter);
        assert_eq!(limiter.unsubmitted_task_count(&"a"), 0);
        assert!(limiter.unsubmitted_task_count_map().is_empty());
    }

    #[test]
    fn idle_keys_are_removed() {
        let limiter = KeyedLimiter::new(Parking::default(), 2).unwrap();
        let result = limiter.submit("k", || 9).unwrap();
        assert_eq!(limiter.tracked_key_count(), 1);
        run_all(&limiter);
        assert_eq!(result.get().unwrap(), 9);
        assert_eq!(limiter.tracked_key_count(), 0);
    }

    #[test]
    fn zero_limit_is_invalid() {
        let err = KeyedLimiter::<u32, _>::new(Parking::default(), 0).err().unwrap();
        assert!(matches!(err, ThreadworkError::InvalidArgument(_)));
    }

    #[test]
    fn sub_pool_name_includes_key() {
        let limiter = KeyedLimiter::with_sub_pool_name(Parking::default(), 1, "tenant").unwrap();
        let name = limiter.submit(7u32, threadwork_core::naming::current_task_name).unwrap();
        loop {
            let task = limiter.inner.target.tasks.lock().pop_front();
            match task {
                Some(task) => task(),
                None => break,
            }
        }
        assert_eq!(name.get().unwrap().as_deref(), Some("tenant-7"));
    }
}
