//! Fault boundary around user-supplied callbacks.
//!
//! A callback that returns an error or panics degrades to `None`; the caller
//! picks the local default. Nothing raised by a callback reaches the
//! execution engine.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};

use futures::FutureExt;

pub(crate) fn guard<T>(callback: &str, f: impl FnOnce() -> miette::Result<T>) -> Option<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Some(value),
        Ok(Err(report)) => {
            tracing::warn!(callback, error = %report, "Callback failed, using default");
            None
        }
        Err(panic) => {
            tracing::warn!(callback, panic = panic_message(&*panic), "Callback panicked, using default");
            None
        }
    }
}

/// Like [`guard`] for callbacks whose result is not a `Result`.
pub(crate) fn catch<T>(callback: &str, f: impl FnOnce() -> T) -> Option<T> {
    guard(callback, || Ok(f()))
}

pub(crate) async fn guard_async<T, Fut>(
    callback: &str,
    start: impl FnOnce() -> Fut,
) -> Option<T>
where
    Fut: Future<Output = miette::Result<T>>,
{
    let future = match catch_unwind(AssertUnwindSafe(start)) {
        Ok(future) => future,
        Err(panic) => {
            tracing::warn!(callback, panic = panic_message(&*panic), "Callback panicked, using default");
            return None;
        }
    };
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(report)) => {
            tracing::warn!(callback, error = %report, "Callback failed, using default");
            None
        }
        Err(panic) => {
            tracing::warn!(callback, panic = panic_message(&*panic), "Callback panicked, using default");
            None
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
