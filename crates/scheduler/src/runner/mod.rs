//! Priority scheduler runner -- owns the worker pool and the task queue.
//!
//! Split into focused submodules:
//! - `core`: PriorityScheduler struct, constructor, lifecycle and accessors
//! - `submission`: enqueue paths and the `Executor` / `Scheduler` impls
//! - `worker`: worker thread loop, task execution and recurrence

mod core;
mod submission;
mod worker;

pub use self::core::PriorityScheduler;
pub use self::submission::PrioritizedScheduler;
