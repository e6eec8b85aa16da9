//! Time-ordered, priority-aware task queue.
//!
//! Pure data structure: every decision takes `now` as an argument, so the
//! ordering and anti-starvation rules are testable without real time.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use super::task::TaskWrapper;
use super::types::Priority;

/// Outcome of asking the queue for work.
#[derive(Debug)]
pub(crate) enum Poll {
    /// A task to run now. `promoted` is set when a low-priority task was
    /// taken ahead of an eligible high-priority one.
    Ready { task: TaskWrapper, promoted: bool },
    /// Nothing eligible yet; the earliest run-time in the queue.
    Wait(Instant),
    Empty,
}

type Lane = BTreeMap<(Instant, u64), TaskWrapper>;

/// One lane per priority class, each ordered by (run-time, submission seq).
#[derive(Default)]
pub(crate) struct TaskQueue {
    lanes: [Lane; 3],
    next_seq: u64,
}

impl TaskQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, task: TaskWrapper) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.lanes[task.priority.index()].insert((task.run_time, seq), task);
    }

    pub(crate) fn len(&self) -> usize {
        self.lanes.iter().map(BTreeMap::len).sum()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.lanes.iter().all(BTreeMap::is_empty)
    }

    pub(crate) fn len_for(&self, priority: Priority) -> usize {
        self.lanes[priority.index()].len()
    }

    /// Head of a lane, discarding cancelled wrappers into `discarded`.
    fn head(&mut self, priority: Priority, discarded: &mut Vec<TaskWrapper>) -> Option<(Instant, u64)> {
        let lane = &mut self.lanes[priority.index()];
        loop {
            let (key, cancelled) = match lane.first_key_value() {
                Some((key, task)) => (*key, task.is_cancelled()),
                None => return None,
            };
            if !cancelled {
                return Some(key);
            }
            if let Some((_, task)) = lane.pop_first() {
                discarded.push(task);
            }
        }
    }

    fn take(&mut self, priority: Priority, key: (Instant, u64)) -> Option<TaskWrapper> {
        self.lanes[priority.index()].remove(&key)
    }

    /// Pick the next task to run at `now`.
    ///
    /// Eligible tasks go by priority, then run-time. The one exception: an
    /// eligible low-priority head that has waited at least `max_wait` since
    /// its run-time is taken ahead of eligible high-priority work. Cancelled
    /// wrappers met along the way are moved into `discarded` so the caller
    /// can drop them outside its lock.
    pub(crate) fn poll(&mut self, now: Instant, max_wait: Duration, discarded: &mut Vec<TaskWrapper>) -> Poll {
        let high = self.head(Priority::High, discarded);
        let low = self.head(Priority::Low, discarded);
        let starvable = self.head(Priority::Starvable, discarded);

        let eligible = |head: Option<(Instant, u64)>| head.filter(|(run_time, _)| *run_time <= now);

        if let Some(key) = eligible(low) {
            if now.duration_since(key.0) >= max_wait {
                let promoted = eligible(high).is_some();
                if let Some(task) = self.take(Priority::Low, key) {
                    return Poll::Ready { task, promoted };
                }
            }
        }

        for (priority, head) in [
            (Priority::High, high),
            (Priority::Low, low),
            (Priority::Starvable, starvable),
        ] {
            if let Some(key) = eligible(head) {
                if let Some(task) = self.take(priority, key) {
                    return Poll::Ready { task, promoted: false };
                }
            }
        }

        match [high, low, starvable].into_iter().flatten().map(|(t, _)| t).min() {
            Some(next) => Poll::Wait(next),
            None => Poll::Empty,
        }
    }

    /// Remove every recurring task, leaving one-time tasks queued.
    pub(crate) fn drain_recurring(&mut self) -> Vec<TaskWrapper> {
        let mut drained = Vec::new();
        for lane in &mut self.lanes {
            let keys: Vec<_> = lane
                .iter()
                .filter(|(_, task)| task.is_recurring())
                .map(|(key, _)| *key)
                .collect();
            for key in keys {
                if let Some(task) = lane.remove(&key) {
                    drained.push(task);
                }
            }
        }
        drained
    }

    /// Remove everything, in priority then run-time order.
    pub(crate) fn drain_all(&mut self) -> Vec<TaskWrapper> {
        self.lanes
            .iter_mut()
            .flat_map(|lane| std::mem::take(lane).into_values())
            .collect()
    }
}
