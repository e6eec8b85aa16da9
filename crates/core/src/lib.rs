pub mod config;
pub mod error;
pub mod exception;
pub mod executor;
pub mod future;
pub mod intercepter;
pub mod naming;

pub use error::*;
pub use executor::{
    Executor, RecurringTask, Runnable, SameThreadExecutor, Scheduler, SubmitterExecutor,
    SubmitterScheduler, TaskHandle,
};
pub use future::{FutureStatus, FutureTask, ListenableFuture, TaskResult};
pub use intercepter::TaskIntercepter;
