//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (bind, accept)
//!     → connection.rs (open-socket set, per-request accounting)
//!     → Hand off to HTTP layer
//!
//! Connection States:
//!     Open → Serving → Closed (peer hang-up, or destroyed on server close)
//! ```
//!
//! # Design Decisions
//! - Every socket is tracked so shutdown can destroy idle keep-alive ones
//! - Requests are tracked separately from sockets; drain waits on requests

pub mod connection;
pub mod listener;

pub use connection::{ActiveRequest, ConnectionGuard, ConnectionId, ConnectionTracker, RequestTracker};
pub use listener::{bind, ListenerError};
