use std::fmt;
use std::hash::Hash;

use threadwork_core::{Executor, Result, Runnable, TaskHandle};

use crate::distributor::KeyDistributedExecutor;

/// An [`Executor`] bound to one key of a [`KeyDistributedExecutor`].
///
/// Everything executed through it joins that key's sequence, so it can be
/// handed to code that only knows about plain executors.
pub struct KeySubmitter<K, E> {
    executor: KeyDistributedExecutor<K, E>,
    key: K,
}

impl<K: Clone, E> Clone for KeySubmitter<K, E> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            key: self.key.clone(),
        }
    }
}

impl<K, E> KeySubmitter<K, E> {
    pub(crate) fn new(executor: KeyDistributedExecutor<K, E>, key: K) -> Self {
        Self { executor, key }
    }

    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K, E> Executor for KeySubmitter<K, E>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    E: Executor + 'static,
{
    fn execute(&self, task: Runnable) -> Result<()> {
        self.executor.execute_runnable(self.key.clone(), task, None)
    }

    fn execute_tracked(&self, task: Runnable, future: TaskHandle) -> Result<()> {
        self.executor.execute_runnable(self.key.clone(), task, Some(future))
    }
}
