//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     listen() → bind → accept loop → onStart (background)
//!
//! Shutdown (Server::close):
//!     Draining → wait for in-flight requests → stop accepting
//!     → destroy open sockets → onClose → flush telemetry → Closed
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Server::close
//!
//! Faults (faults.rs):
//!     uncaught panic → ErrorReporter → onError
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: drain, stop accept, destroy sockets, hooks, flush
//! - No shutdown deadline: close waits for the last request
//! - Hook failures are reported, never fatal

pub mod faults;
pub mod hooks;
pub mod registry;
pub mod signals;
pub mod state;

pub use faults::install_panic_hook;
pub use hooks::{BoxError, ErrorReporter, HookContext, HookFuture, NoHooks, ServerHooks};
pub use registry::ServerRegistry;
pub use signals::{shutdown_signal, ShutdownSignal};
pub use state::LifecycleState;
