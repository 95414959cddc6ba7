//! Explicit registry of running servers.

use std::sync::{Mutex, MutexGuard, PoisonError};

use futures_util::future::join_all;

use crate::http::Server;

/// Servers that should be closed together.
#[derive(Debug, Default)]
pub struct ServerRegistry {
    servers: Mutex<Vec<Server>>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Server>> {
        self.servers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add `server`. Registering the same server twice is a no-op.
    pub fn register(&self, server: Server) {
        let mut servers = self.lock();
        if !servers.iter().any(|s| s.id() == server.id()) {
            servers.push(server);
        }
    }

    /// Remove `server`. Returns whether it was registered.
    pub fn unregister(&self, server: &Server) -> bool {
        let mut servers = self.lock();
        let before = servers.len();
        servers.retain(|s| s.id() != server.id());
        servers.len() != before
    }

    pub fn all(&self) -> Vec<Server> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Close every registered server concurrently and empty the registry.
    pub async fn close_all(&self) {
        let servers = std::mem::take(&mut *self.lock());
        tracing::debug!(servers = servers.len(), "Closing all servers");
        join_all(servers.iter().map(|server| server.close())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::lifecycle::LifecycleState;

    #[tokio::test]
    async fn register_is_idempotent_and_close_all_empties() {
        let registry = ServerRegistry::new();
        let a = Server::new(".", ServerConfig::default());
        let b = Server::new(".", ServerConfig::default());

        registry.register(a.clone());
        registry.register(a.clone());
        registry.register(b.clone());
        assert_eq!(registry.len(), 2);

        assert!(registry.unregister(&b));
        assert!(!registry.unregister(&b));

        registry.close_all().await;
        assert!(registry.is_empty());
        assert_eq!(a.state(), LifecycleState::Closed);
        assert_eq!(b.state(), LifecycleState::Created);
    }
}
