//! Process-wide fault funnel.
//!
//! Panics anywhere in the process reach the same [`ErrorReporter`] path as
//! handler errors. Panics raised while a handler future is being polled are
//! skipped here: the request processor catches and reports those itself.

use std::any::Any;
use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::error::FuncError;
use crate::lifecycle::hooks::ErrorReporter;

thread_local! {
    static CONTAINED: Cell<usize> = const { Cell::new(0) };
}

struct ContainedScope;

impl ContainedScope {
    fn enter() -> Self {
        CONTAINED.with(|depth| depth.set(depth.get() + 1));
        ContainedScope
    }
}

impl Drop for ContainedScope {
    fn drop(&mut self) {
        CONTAINED.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

fn is_contained() -> bool {
    CONTAINED.with(|depth| depth.get() > 0)
}

/// Future whose panics are caught and reported by the caller.
pub struct Contained<F> {
    inner: F,
}

/// Mark `fut` as one whose panics the caller handles.
pub fn contain<F: Future + Unpin>(fut: F) -> Contained<F> {
    Contained { inner: fut }
}

impl<F: Future + Unpin> Future for Contained<F> {
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let _scope = ContainedScope::enter();
        Pin::new(&mut self.inner).poll(cx)
    }
}

/// Text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "Unknown panic".to_string()
    }
}

/// Route uncaught panics to `reporter`, then to the previous hook.
pub fn install_panic_hook(reporter: ErrorReporter) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        if !is_contained() {
            let location = info
                .location()
                .map(|l| format!(" at {}:{}", l.file(), l.line()))
                .unwrap_or_default();
            reporter.report(FuncError::handler(format!(
                "Uncaught panic{location}: {}",
                panic_message(info.payload())
            )));
        }
        previous(info);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use std::panic::AssertUnwindSafe;

    #[test]
    fn payload_text() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "Unknown panic");
    }

    #[tokio::test]
    async fn scope_is_left_after_panic() {
        let fut = contain(Box::pin(async {
            assert!(is_contained());
            panic!("inside");
        }));
        let caught = AssertUnwindSafe(fut).catch_unwind().await;

        assert!(caught.is_err());
        assert!(!is_contained());
    }
}
