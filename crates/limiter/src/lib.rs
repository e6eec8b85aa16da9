//! Concurrency limiting on top of a shared executor.
//!
//! Limiters never own threads. They decide when a task is handed to the
//! wrapped target, so a subsystem can be capped without a pool of its own.

mod keyed_limiter;
mod limiter;
mod rejector;
mod scheduler_limiter;

pub use keyed_limiter::KeyedLimiter;
pub use limiter::ExecutorLimiter;
pub use rejector::QueueLimitRejector;
pub use scheduler_limiter::SchedulerLimiter;
