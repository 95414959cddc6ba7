//! Single-port HTTP dispatcher for file-based function handlers.
//!
//! A request path maps to a handler file under the server root
//! (`/a/b` → `a/b.func.ts`, `a/b/index.func.ts`, nearest `default.func.ts`).
//! Handlers are loaded once and cached per path; requests for the same path
//! are answered one at a time, in arrival order.

pub mod config;
pub mod error;
pub mod func;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod routing;

pub use config::{ConfigLoader, Environment, FileConfigLoader, FuncConfig, ServerConfig};
pub use error::{ErrorKind, FuncError};
pub use func::{
    Context, Event, Handler, HandlerFuture, HandlerLoader, Output, ProcessLoader, Reply,
    StaticLoader, StreamReply,
};
pub use http::{Server, ServerBuilder};
pub use lifecycle::{
    ErrorReporter, HookContext, HookFuture, LifecycleState, NoHooks, ServerHooks, ServerRegistry,
};
