use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::types::Priority;

/// Scheduler operational metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    /// Tasks run to completion (or panic) per priority.
    pub tasks_executed: HashMap<Priority, u64>,
    /// Runs whose panic escaped the task body, per priority. Failures captured
    /// into a submitted future are not counted here.
    pub tasks_failed: HashMap<Priority, u64>,
    /// Times a low-priority task was taken ahead of eligible high-priority work.
    pub starvation_promotions: u64,
    /// Average run duration per priority.
    pub avg_task_duration: HashMap<Priority, Duration>,
    /// Wall-clock time of the most recent run.
    pub last_run: Option<DateTime<Utc>>,
    /// Worker threads alive when the snapshot was taken.
    pub pool_size: usize,
    /// Tasks waiting in the queue when the snapshot was taken.
    pub queued_tasks: usize,
}

impl SchedulerMetrics {
    /// Record one task run.
    pub fn record_execution(&mut self, priority: Priority, duration: Duration, failed: bool) {
        *self.tasks_executed.entry(priority).or_default() += 1;
        if failed {
            *self.tasks_failed.entry(priority).or_default() += 1;
        }
        self.last_run = Some(Utc::now());

        // Update rolling average duration
        let count = self.tasks_executed[&priority];
        let prev_avg = self
            .avg_task_duration
            .get(&priority)
            .copied()
            .unwrap_or_default();

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let new_avg = if count == 1 {
            duration
        } else {
            let prev_nanos = prev_avg.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };

        self.avg_task_duration.insert(priority, new_avg);
    }

    pub fn record_promotion(&mut self) {
        self.starvation_promotions += 1;
    }

    /// Total runs across all priorities.
    pub fn total_executed(&self) -> u64 {
        self.tasks_executed.values().sum()
    }
}
