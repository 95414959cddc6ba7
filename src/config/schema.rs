//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the function server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind host and port).
    pub listener: ListenerConfig,

    /// Runtime mode flags.
    pub mode: ModeConfig,

    /// Route file conventions.
    pub routing: RoutingConfig,

    /// Interpreter table for process handlers.
    pub loader: LoaderConfig,

    /// Request and stream size limits.
    pub limits: LimitsConfig,

    /// Response compression policy.
    pub compression: CompressionConfig,

    /// Startup/shutdown behaviour.
    pub lifecycle: LifecycleConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl ServerConfig {
    /// Base URL other local services can use to reach this server.
    pub fn local_base_url(&self) -> String {
        format!("http://localhost:{}", self.listener.port)
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind host (e.g., "0.0.0.0").
    pub host: String,

    /// Bind port. `0` picks an ephemeral port.
    pub port: u16,
}

impl ListenerConfig {
    /// Bind address in `host:port` form.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

/// Development/production switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!("unknown environment '{other}'")),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime mode flags.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ModeConfig {
    /// Error verbosity and config section selection.
    pub env: Environment,

    /// Deployment mode label passed to handlers.
    pub deploy: String,
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self {
            env: Environment::Development,
            deploy: "mono".to_string(),
        }
    }
}

/// Route file conventions.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Handler file extensions, in preference order.
    pub extensions: Vec<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["ts".to_string(), "tsx".to_string()],
        }
    }
}

/// Interpreter commands for process handlers, keyed by file extension.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub interpreters: HashMap<String, Vec<String>>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        let mut interpreters = HashMap::new();
        interpreters.insert("ts".to_string(), vec!["tsx".to_string()]);
        interpreters.insert("tsx".to_string(), vec!["tsx".to_string()]);
        Self { interpreters }
    }
}

/// Size limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Chunks buffered between a streamed reply and the socket.
    pub stream_buffer_chunks: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 10 * 1024 * 1024, // 10MB
            stream_buffer_chunks: 16,
        }
    }
}

/// Response compression policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Smallest textual 200 body that gets compressed.
    pub min_bytes: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self { min_bytes: 600 }
    }
}

/// Startup/shutdown behaviour.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Poll interval while waiting for in-flight requests during close.
    pub drain_poll_ms: u64,

    /// Close on SIGTERM/SIGINT.
    pub handle_signals: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            drain_poll_ms: 50,
            handle_signals: true,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
