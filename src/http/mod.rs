//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (hyper http1, Axum fallback dispatch)
//!     → OPTIONS: headers.rs preflight answer, done
//!     → queue.rs (FIFO lane per route key)
//!     → processor.rs (handler invocation, framing)
//!     → compression.rs / body.rs
//!     → Send to client
//! ```

pub mod body;
pub mod compression;
pub mod headers;
pub mod processor;
pub mod queue;
pub mod server;

pub use compression::Encoding;
pub use processor::{PendingRequest, RequestProcessor};
pub use queue::{Drain, LaneState, RequestQueue};
pub use server::{Server, ServerBuilder};
