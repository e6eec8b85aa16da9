//! Priority-aware thread pool scheduler.
//!
//! [`PriorityScheduler`] runs one-time and fixed-delay recurring tasks on a
//! lazily grown worker pool. Eligible tasks are served by priority class
//! (High, then Low, then Starvable) and run-time, except that a low-priority
//! task kept waiting past `max_wait_for_low_priority` jumps ahead of
//! high-priority work.

pub mod metrics;
mod queue;
pub mod runner;
mod task;
pub mod types;

pub use metrics::SchedulerMetrics;
pub use runner::{PrioritizedScheduler, PriorityScheduler};
pub use task::UnrunTask;
pub use types::{Priority, SchedulerConfig};
