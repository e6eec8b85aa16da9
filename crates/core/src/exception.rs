//! Process-wide sink for failures nobody else is positioned to observe.
//!
//! Panicking listeners, failing recurring tasks and tasks handed over with a
//! plain `execute` have no future to carry their error, so they end up here.
//! A thread-local handler, when set, takes precedence over the global one.

use std::any::Any;
use std::cell::RefCell;
use std::sync::Arc;

use parking_lot::RwLock;

/// Callback receiving an uncaught task or listener failure.
pub type ExceptionHandler = Arc<dyn Fn(&anyhow::Error) + Send + Sync>;

static GLOBAL_HANDLER: RwLock<Option<ExceptionHandler>> = parking_lot::const_rwlock(None);

thread_local! {
    static LOCAL_HANDLER: RefCell<Option<ExceptionHandler>> = const { RefCell::new(None) };
}

/// Install the process-wide handler, replacing any previous one.
pub fn set_exception_handler(handler: ExceptionHandler) {
    *GLOBAL_HANDLER.write() = Some(handler);
}

/// Remove the process-wide handler; failures go back to being logged.
pub fn clear_exception_handler() {
    *GLOBAL_HANDLER.write() = None;
}

/// Install a handler for the calling thread only. `None` removes it.
pub fn set_thread_local_exception_handler(handler: Option<ExceptionHandler>) {
    LOCAL_HANDLER.with(|h| *h.borrow_mut() = handler);
}

/// Route an uncaught failure to the most specific handler available.
pub fn handle_exception(err: &anyhow::Error) {
    let local = LOCAL_HANDLER.with(|h| h.borrow().clone());
    let handler = local.or_else(|| GLOBAL_HANDLER.read().clone());
    match handler {
        Some(handler) => {
            // a panicking handler must not take the worker down with it
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(err)));
            if outcome.is_err() {
                tracing::error!(error = %err, "exception handler panicked while handling failure");
            }
        }
        None => tracing::error!(error = %err, "uncaught task failure"),
    }
}

/// Turn a caught panic payload into an error carrying its message.
pub fn panic_to_error(payload: Box<dyn Any + Send>) -> anyhow::Error {
    let msg = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    };
    anyhow::anyhow!("task panicked: {}", msg)
}

/// Run `f`, routing a panic to [`handle_exception`] instead of unwinding.
pub fn run_guarded<F: FnOnce()>(f: F) {
    if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        handle_exception(&panic_to_error(payload));
    }
}
