use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

use threadwork_core::{Executor, Result, ThreadworkError};

use crate::distributor::KeyDistributedExecutor;

pub(crate) const DEFAULT_LOCK_STRIPES: usize = 16;
pub(crate) const DEFAULT_MAX_TASKS_PER_CYCLE: usize = 1;

/// Options for [`KeyDistributedExecutor`].
pub struct KeyDistributedBuilder<K, E> {
    target: E,
    lock_stripes: usize,
    accurate_queue_size: bool,
    max_tasks_per_cycle: usize,
    _key: PhantomData<fn() -> K>,
}

impl<K, E> KeyDistributedBuilder<K, E>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    E: Executor + 'static,
{
    pub(crate) fn new(target: E) -> Self {
        Self {
            target,
            lock_stripes: DEFAULT_LOCK_STRIPES,
            accurate_queue_size: false,
            max_tasks_per_cycle: DEFAULT_MAX_TASKS_PER_CYCLE,
            _key: PhantomData,
        }
    }

    /// Number of independently locked key stripes. Affects contention only.
    pub fn lock_stripes(mut self, n: usize) -> Self {
        self.lock_stripes = n;
        self
    }

    /// Count the task currently running for a key in its queue size.
    pub fn accurate_queue_size(mut self, accurate: bool) -> Self {
        self.accurate_queue_size = accurate;
        self
    }

    /// Tasks a key's worker runs before handing its thread back to the
    /// target and re-submitting itself.
    pub fn max_tasks_per_cycle(mut self, n: usize) -> Self {
        self.max_tasks_per_cycle = n;
        self
    }

    pub fn build(self) -> Result<KeyDistributedExecutor<K, E>> {
        if self.lock_stripes == 0 {
            return Err(ThreadworkError::invalid_argument("lock_stripes must be greater than zero"));
        }
        if self.max_tasks_per_cycle == 0 {
            return Err(ThreadworkError::invalid_argument(
                "max_tasks_per_cycle must be greater than zero",
            ));
        }
        Ok(KeyDistributedExecutor::from_parts(
            self.target,
            self.lock_stripes,
            self.accurate_queue_size,
            self.max_tasks_per_cycle,
        ))
    }
}
