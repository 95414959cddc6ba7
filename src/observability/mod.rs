//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events through tracing)
//!     → metrics.rs (counters, gauges, histograms)
//!     → spans.rs (request/server spans carrying correlation IDs)
//!
//! Consumers:
//!     → stdout through a non-blocking writer (flushed on server close)
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) in production, pretty in development
//! - Request ID flows through every event of a request via its span
//! - Metrics are cheap (atomic increments); without an exporter they are no-ops

pub mod logging;
pub mod metrics;
pub mod spans;
