//! Lifecycle hooks and the error-reporting path.
//!
//! # Responsibilities
//! - Define the async `on_start` / `on_error` / `on_close` hooks
//! - Funnel every reported error through one place: log, metric, `on_error`
//!
//! # Design Decisions
//! - A failing hook is reported, never propagated into the transition it belongs to
//! - A failing `on_error` is only logged, so reporting cannot recurse

use std::sync::Arc;
use std::time::Instant;

use futures_util::future::BoxFuture;
use tracing::Span;

use crate::error::FuncError;
use crate::observability::{metrics, spans};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Future returned by every hook.
pub type HookFuture = BoxFuture<'static, Result<(), BoxError>>;

/// What a hook gets to work with.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub server_id: Arc<str>,
    /// Span labelled with the server id; enter it to log as the server.
    pub span: Span,
}

/// Callbacks around the server lifecycle. Every method defaults to a no-op.
pub trait ServerHooks: Send + Sync {
    /// Runs in the background once the server is listening.
    fn on_start(&self, _ctx: HookContext) -> HookFuture {
        Box::pin(async { Ok(()) })
    }

    /// Runs for every reported error.
    fn on_error(&self, _error: FuncError, _ctx: HookContext) -> HookFuture {
        Box::pin(async { Ok(()) })
    }

    /// Runs after in-flight requests drained and sockets were closed.
    fn on_close(&self, _ctx: HookContext) -> HookFuture {
        Box::pin(async { Ok(()) })
    }
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl ServerHooks for NoHooks {}

/// The single error-reporting path of a server.
#[derive(Clone)]
pub struct ErrorReporter {
    server_id: Arc<str>,
    span: Span,
    hooks: Arc<dyn ServerHooks>,
}

impl std::fmt::Debug for ErrorReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorReporter")
            .field("server_id", &self.server_id)
            .finish_non_exhaustive()
    }
}

impl ErrorReporter {
    pub fn new(server_id: impl Into<Arc<str>>, hooks: Arc<dyn ServerHooks>) -> Self {
        let server_id = server_id.into();
        let span = spans::server_span(&server_id);
        Self {
            server_id,
            span,
            hooks,
        }
    }

    pub fn context(&self) -> HookContext {
        HookContext {
            server_id: Arc::clone(&self.server_id),
            span: self.span.clone(),
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Log the error and hand it to `on_error` in the background.
    pub fn report(&self, error: FuncError) {
        tracing::error!(
            parent: &self.span,
            kind = error.kind().as_str(),
            error = %error,
            "Reported error"
        );
        metrics::record_error(error.kind());

        let fut = self.hooks.on_error(error, self.context());
        let span = self.span.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = fut.await {
                        tracing::error!(parent: &span, error = %e, "[onError] hook failed");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(parent: &self.span, "No runtime available, [onError] skipped");
            }
        }
    }

    /// Await a lifecycle hook, reporting its failure.
    pub async fn run_hook(&self, hook: &'static str, fut: HookFuture) {
        let started = Instant::now();
        tracing::debug!(parent: &self.span, "[{hook}] begin");

        if let Err(e) = fut.await {
            self.report(FuncError::Lifecycle {
                hook,
                message: e.to_string(),
            });
        }

        tracing::debug!(
            parent: &self.span,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "[{hook}] end"
        );
    }
}
