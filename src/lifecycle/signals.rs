//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGTERM, SIGINT)
//! - Translate signals to a drain-then-close request
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - A signal arriving while already closing is ignored by the caller

/// Signal that asked the server to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Terminate,
    Interrupt,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Terminate => f.write_str("SIGTERM"),
            ShutdownSignal::Interrupt => f.write_str("SIGINT"),
        }
    }
}

/// Wait for SIGTERM or SIGINT.
#[cfg(unix)]
pub async fn shutdown_signal() -> std::io::Result<ShutdownSignal> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => Ok(ShutdownSignal::Terminate),
        _ = sigint.recv() => Ok(ShutdownSignal::Interrupt),
    }
}

/// Windows fallback - only handles Ctrl+C
#[cfg(not(unix))]
pub async fn shutdown_signal() -> std::io::Result<ShutdownSignal> {
    tokio::signal::ctrl_c().await?;
    Ok(ShutdownSignal::Interrupt)
}
