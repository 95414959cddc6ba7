//! TCP listener binding.
//!
//! # Responsibilities
//! - Resolve the configured host/port
//! - Bind the listening socket
//! - Report the actual bound address (port 0 picks one)

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::ListenerConfig;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to resolve the configured address.
    #[error("Invalid bind address {0}: {1}")]
    Address(String, std::io::Error),
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    Bind(std::io::Error),
}

/// Bind to the configured address.
pub async fn bind(config: &ListenerConfig) -> Result<(TcpListener, SocketAddr), ListenerError> {
    let address = config.address();

    let addr: SocketAddr = match tokio::net::lookup_host(address.as_str()).await {
        Ok(mut addrs) => addrs.next().ok_or_else(|| {
            ListenerError::Address(
                address.clone(),
                std::io::Error::new(std::io::ErrorKind::NotFound, "no address resolved"),
            )
        })?,
        Err(e) => return Err(ListenerError::Address(address.clone(), e)),
    };

    let listener = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
    let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;

    tracing::info!(address = %local_addr, "Listener bound");

    Ok((listener, local_addr))
}
