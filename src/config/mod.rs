//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! server config file (TOML)
//!     → loader.rs (parse & deserialize, FaasEnv/FaasMode overlay)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → shared via Arc to resolver, processor and lifecycle
//!
//! per-function config (faas.toml cascade)
//!     → func.rs (root → handler dir, defaults + env section)
//!     → FuncConfig cached next to the handler
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; no reload at runtime
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Mode switches are typed values, not ambient environment reads

pub mod func;
pub mod loader;
pub mod schema;
pub mod validation;

pub use func::{ConfigLoader, FileConfigLoader, FuncConfig};
pub use loader::{apply_env, load_config, ConfigError};
pub use schema::{Environment, ServerConfig};
pub use schema::{CompressionConfig, LifecycleConfig, LimitsConfig, ListenerConfig};
