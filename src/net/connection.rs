//! Socket and request tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Keep the set of open client sockets so close can destroy them
//! - Count requests that have arrived but are not fully answered
//!
//! # Design Decisions
//! - Guards decrement/remove on drop, so panics and client aborts are counted
//! - Socket entries hold the connection task's abort handle; aborting the
//!   task drops the stream, which closes the socket
//! - The request counter cannot go negative: only guards decrement it

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::AbortHandle;

use crate::observability::metrics;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Set of open client sockets.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    sockets: Arc<Mutex<HashMap<ConnectionId, Option<AbortHandle>>>>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, Option<AbortHandle>>> {
        self.sockets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new socket. The guard removes it when dropped.
    pub fn track(&self) -> ConnectionGuard {
        let id = ConnectionId::new();
        let count = {
            let mut sockets = self.lock();
            sockets.insert(id, None);
            sockets.len()
        };
        metrics::set_open_sockets(count);
        tracing::trace!(connection_id = %id, "Connection opened");

        ConnectionGuard {
            tracker: self.clone(),
            id,
        }
    }

    /// Attach the task serving `id` so it can be aborted.
    ///
    /// Ignored if the connection already finished.
    pub fn attach(&self, id: ConnectionId, handle: AbortHandle) {
        let mut sockets = self.lock();
        if let Some(slot) = sockets.get_mut(&id) {
            *slot = Some(handle);
        }
    }

    pub fn open_count(&self) -> usize {
        self.lock().len()
    }

    /// Abort every open socket and clear the set. Returns how many were destroyed.
    pub fn destroy_all(&self) -> usize {
        let drained: Vec<(ConnectionId, Option<AbortHandle>)> = self.lock().drain().collect();
        for (id, handle) in &drained {
            if let Some(handle) = handle {
                handle.abort();
            }
            tracing::trace!(connection_id = %id, "Connection destroyed");
        }
        metrics::set_open_sockets(0);
        drained.len()
    }

    fn remove(&self, id: ConnectionId) {
        let count = {
            let mut sockets = self.lock();
            sockets.remove(&id);
            sockets.len()
        };
        metrics::set_open_sockets(count);
    }
}

/// Guard that tracks a socket's lifetime.
/// Removes it from the open set when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    tracker: ConnectionTracker,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.tracker.remove(self.id);
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

/// Counts requests from arrival until their response is fully written.
#[derive(Debug, Clone, Default)]
pub struct RequestTracker {
    active: Arc<AtomicUsize>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a new request. Clones of the returned token share one slot;
    /// the count drops when the last clone is gone.
    pub fn begin(&self) -> ActiveRequest {
        let count = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_active_requests(count);
        ActiveRequest(Arc::new(RequestSlot {
            active: Arc::clone(&self.active),
        }))
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Poll until no request is active.
    pub async fn wait_idle(&self, poll: Duration) {
        loop {
            let active = self.active_count();
            if active == 0 {
                return;
            }
            tracing::debug!(active_requests = active, "Waiting for requests");
            tokio::time::sleep(poll).await;
        }
    }
}

/// Shared token for one in-flight request.
#[derive(Debug, Clone)]
pub struct ActiveRequest(Arc<RequestSlot>);

#[derive(Debug)]
struct RequestSlot {
    active: Arc<AtomicUsize>,
}

impl Drop for RequestSlot {
    fn drop(&mut self) {
        let count = self.active.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_active_requests(count);
    }
}
