use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use parking_lot::MutexGuard;
use threadwork_core::exception::{handle_exception, panic_to_error};
use tracing::{debug, error, warn};

use crate::queue::Poll;
use crate::task::{run_time_after, TaskKind, TaskWrapper};

use super::core::{PoolState, Shared};

/// Start one worker thread. The caller has already counted it in
/// `pool_size`.
pub(super) fn spawn_worker(shared: &Arc<Shared>) {
    let n = shared.next_thread_id.fetch_add(1, Ordering::Relaxed);
    let name = format!("{}-{}", shared.config.thread_name_prefix, n);
    let worker_shared = Arc::clone(shared);
    match thread::Builder::new()
        .name(name.clone())
        .spawn(move || worker_loop(worker_shared))
    {
        Ok(_) => debug!(thread = %name, "worker started"),
        Err(e) => {
            error!(thread = %name, error = %e, "failed to spawn worker thread");
            let mut state = shared.state.lock();
            state.pool_size -= 1;
            if Shared::is_terminated(&state) {
                shared.terminated.notify_all();
            }
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    let mut state = shared.state.lock();
    loop {
        let mut discarded = Vec::new();
        let polled = state
            .queue
            .poll(Instant::now(), shared.max_wait_for_low_priority(), &mut discarded);
        if !discarded.is_empty() {
            // cancelled tasks may own guards whose drop re-enters the scheduler
            MutexGuard::unlocked(&mut state, move || drop(discarded));
            if !matches!(polled, Poll::Ready { .. }) {
                continue;
            }
        }

        match polled {
            Poll::Ready { task, promoted } => {
                state.running += 1;
                let requeue = MutexGuard::unlocked(&mut state, || run_task(&shared, task, promoted));
                state.running -= 1;
                if let Some(next) = requeue {
                    if state.shutdown {
                        MutexGuard::unlocked(&mut state, move || {
                            next.cancel();
                        });
                    } else {
                        state.queue.push(next);
                    }
                }
            }
            Poll::Wait(deadline) => {
                state.idle += 1;
                shared.work_available.wait_until(&mut state, deadline);
                state.idle -= 1;
            }
            Poll::Empty => {
                if state.shutdown {
                    break;
                }
                if wait_for_work(&shared, &mut state) {
                    debug!(pool_size = state.pool_size, "idle worker retiring");
                    break;
                }
            }
        }
    }

    state.pool_size -= 1;
    if Shared::is_terminated(&state) {
        debug!("last worker exited");
        shared.terminated.notify_all();
    }
}

/// Park until work arrives. Returns `true` when this worker should retire:
/// it is beyond the core size and stayed idle for the whole keep-alive.
fn wait_for_work(shared: &Shared, state: &mut MutexGuard<'_, PoolState>) -> bool {
    state.idle += 1;
    let timed_out = if state.pool_size > shared.config.core_pool_size {
        shared
            .work_available
            .wait_for(state, shared.config.keep_alive())
            .timed_out()
    } else {
        shared.work_available.wait(state);
        false
    };
    state.idle -= 1;
    timed_out && state.pool_size > shared.config.core_pool_size && state.queue.is_empty()
}

/// Run one dequeued task outside the pool lock. Returns the wrapper to
/// re-insert when a recurring task should fire again.
fn run_task(shared: &Shared, task: TaskWrapper, promoted: bool) -> Option<TaskWrapper> {
    let TaskWrapper {
        id,
        priority,
        kind,
        future,
        ..
    } = task;
    if promoted {
        debug!(id, "low priority task promoted past high priority work");
        shared.metrics.lock().record_promotion();
    }

    let started = Instant::now();
    match kind {
        TaskKind::OneTime(body) => {
            let outcome = catch_unwind(AssertUnwindSafe(body));
            shared
                .metrics
                .lock()
                .record_execution(priority, started.elapsed(), outcome.is_err());
            drop(future);
            if let Err(payload) = outcome {
                handle_exception(&panic_to_error(payload));
            }
            None
        }
        TaskKind::Recurring { task: body, period, handle } => {
            // the first firing claims the handle, so a later cancel reports
            // that the task already started
            if !handle.mark_running() && handle.is_done() {
                return None;
            }
            let outcome = catch_unwind(AssertUnwindSafe(|| body()));
            shared
                .metrics
                .lock()
                .record_execution(priority, started.elapsed(), outcome.is_err());
            match outcome {
                Ok(()) if handle.is_done() => None,
                Ok(()) => Some(TaskWrapper::recurring(
                    id,
                    priority,
                    run_time_after(Instant::now(), period),
                    body,
                    period,
                    handle,
                )),
                Err(payload) => {
                    let err = panic_to_error(payload);
                    warn!(id, error = %err, "recurring task failed, recurrence stopped");
                    handle.fail(err);
                    None
                }
            }
        }
    }
}
