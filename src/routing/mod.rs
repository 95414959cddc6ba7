//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (path)
//!     → route_key (strip query, trim slashes)
//!     → resolver.rs (safety check, candidate list)
//!     → Return: first existing handler file or NotFound
//! ```
//!
//! # Design Decisions
//! - File-system conventions only; no route table to compile
//! - Deterministic: same (root, path) always yields the same candidates
//! - First existing file wins
//! - Traversal is rejected before any filesystem access

pub mod resolver;

pub use resolver::{route_files, route_key, RouteEntry, RouteResolver};
