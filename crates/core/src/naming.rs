//! Scoped sub-pool naming around task execution.
//!
//! OS thread names are fixed once a thread is spawned, so the logical name
//! lives in thread-local state and in a `tracing` span for the duration of
//! the task. The previous name is restored on exit, including on unwind.

use std::cell::RefCell;
use std::sync::Arc;

thread_local! {
    static TASK_NAME: RefCell<Option<Arc<str>>> = const { RefCell::new(None) };
}

struct RestoreName(Option<Arc<str>>);

impl Drop for RestoreName {
    fn drop(&mut self) {
        let previous = self.0.take();
        TASK_NAME.with(|n| *n.borrow_mut() = previous);
    }
}

/// Run `f` with `name` as the current logical task name.
pub fn run_named<R>(name: &Arc<str>, f: impl FnOnce() -> R) -> R {
    let previous = TASK_NAME.with(|n| n.borrow_mut().replace(Arc::clone(name)));
    let _restore = RestoreName(previous);
    let span = tracing::debug_span!("sub_pool", name = %name);
    let _entered = span.enter();
    f()
}

/// Logical name of the task running on this thread, if it was given one.
pub fn current_task_name() -> Option<Arc<str>> {
    TASK_NAME.with(|n| n.borrow().clone())
}

/// Name reported for the calling thread: the logical name when inside a named
/// task, otherwise the OS thread name.
pub fn effective_thread_name() -> String {
    match current_task_name() {
        Some(name) => {
            let base = std::thread::current().name().unwrap_or("unnamed").to_string();
            format!("{}[{}]", name, base)
        }
        None => std::thread::current().name().unwrap_or("unnamed").to_string(),
    }
}
