//! Aggregate futures over collections of [`TaskResult`]s.
//!
//! Every combinator returns immediately. An empty input yields an
//! already-terminal result without allocating any tracking state.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{Result, ThreadworkError};

use super::result::{FutureStatus, TaskResult};

pub fn immediate_result_future<T: Send + 'static>(value: T) -> TaskResult<T> {
    let result = TaskResult::new();
    result.complete(value);
    result
}

pub fn immediate_failure_future<T: Send + 'static>(cause: anyhow::Error) -> TaskResult<T> {
    let result = TaskResult::new();
    result.fail(cause);
    result
}

pub fn immediate_cancelled_future<T: Send + 'static>() -> TaskResult<T> {
    let result = TaskResult::new();
    result.cancel(false);
    result
}

/// Counts down as inputs resolve and runs `on_last` exactly once.
fn count_down<T, F>(futures: &[TaskResult<T>], on_last: F)
where
    T: Send + 'static,
    F: Fn() + Send + Sync + 'static,
{
    let remaining = Arc::new(AtomicUsize::new(futures.len()));
    let on_last = Arc::new(on_last);
    for future in futures {
        let remaining = Arc::clone(&remaining);
        let on_last = Arc::clone(&on_last);
        future.add_listener(move || {
            if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                on_last();
            }
        });
    }
}

/// Resolves once every input is terminal. Input failures do not fail it.
pub fn make_complete_future<T: Send + 'static>(futures: &[TaskResult<T>]) -> TaskResult<()> {
    if futures.is_empty() {
        return immediate_result_future(());
    }
    let result = TaskResult::new();
    let done = result.clone();
    count_down(futures, move || {
        done.complete(());
    });
    result
}

/// Resolves once every input completed successfully, or fails as soon as one
/// input fails or is cancelled.
pub fn make_complete_or_first_error_future<T: Send + 'static>(
    futures: &[TaskResult<T>],
) -> TaskResult<()> {
    if futures.is_empty() {
        return immediate_result_future(());
    }
    let result = TaskResult::new();
    let remaining = Arc::new(AtomicUsize::new(futures.len()));
    for future in futures {
        let result = result.clone();
        let remaining = Arc::clone(&remaining);
        future.add_done_callback(move |input| {
            match input.status() {
                FutureStatus::Failed => {
                    if let Some(cause) = input.failure_cause() {
                        result.fail_shared(cause);
                    }
                }
                FutureStatus::Cancelled => {
                    result.fail(anyhow::Error::new(ThreadworkError::Cancelled));
                }
                _ => {}
            }
            if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                result.complete(());
            }
        });
    }
    result
}

/// Resolves with every input, in input order, once all are terminal.
pub fn make_complete_list_future<T: Send + 'static>(
    futures: &[TaskResult<T>],
) -> TaskResult<Vec<TaskResult<T>>> {
    make_filtered_list_future(futures, |_| true)
}

/// Resolves with only the inputs that completed successfully.
pub fn make_success_list_future<T: Send + 'static>(
    futures: &[TaskResult<T>],
) -> TaskResult<Vec<TaskResult<T>>> {
    make_filtered_list_future(futures, |status| status == FutureStatus::Completed)
}

/// Resolves with only the inputs that failed or were cancelled.
pub fn make_failure_list_future<T: Send + 'static>(
    futures: &[TaskResult<T>],
) -> TaskResult<Vec<TaskResult<T>>> {
    make_filtered_list_future(futures, |status| {
        matches!(status, FutureStatus::Failed | FutureStatus::Cancelled)
    })
}

fn make_filtered_list_future<T, P>(futures: &[TaskResult<T>], keep: P) -> TaskResult<Vec<TaskResult<T>>>
where
    T: Send + 'static,
    P: Fn(FutureStatus) -> bool + Send + Sync + 'static,
{
    if futures.is_empty() {
        return immediate_result_future(Vec::new());
    }
    let result = TaskResult::new();
    let done = result.clone();
    let inputs: Vec<TaskResult<T>> = futures.to_vec();
    count_down(futures, move || {
        let kept = inputs.iter().filter(|f| keep(f.status())).cloned().collect();
        done.complete(kept);
    });
    result
}

/// Block the calling thread until every input is terminal.
pub fn block_till_all_complete<T: Send + 'static>(futures: &[TaskResult<T>]) {
    // never fails, so the outcome carries nothing
    let _ = make_complete_future(futures).get();
}

/// Block until every input succeeded, returning the first failure otherwise.
pub fn block_till_all_complete_or_first_error<T: Send + 'static>(
    futures: &[TaskResult<T>],
) -> Result<()> {
    make_complete_or_first_error_future(futures).get()
}
