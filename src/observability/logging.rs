//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Pick the output format from the runtime mode
//! - Hand back the writer guard that flushes buffered lines
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configured level
//! - Output goes through a non-blocking writer; dropping the guard flushes it

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ServerConfig;

/// Install the global subscriber. Returns the guard owning the log writer.
///
/// Calling this when a subscriber is already installed keeps the existing one.
pub fn init(config: &ServerConfig) -> WorkerGuard {
    let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("faas_server={}", config.observability.log_level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.mode.env.is_production() {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(writer))
            .try_init()
    };

    if let Err(e) = result {
        tracing::debug!(error = %e, "Subscriber already installed");
    }

    guard
}
