//! Completion cells returned by every submission, plus combinators.

pub mod combinators;
mod result;
mod task;

pub use combinators::{
    block_till_all_complete, block_till_all_complete_or_first_error, immediate_cancelled_future,
    immediate_failure_future, immediate_result_future, make_complete_future,
    make_complete_list_future, make_complete_or_first_error_future, make_failure_list_future,
    make_success_list_future,
};
pub use result::{FutureStatus, ListenableFuture, TaskResult};
pub use task::FutureTask;
