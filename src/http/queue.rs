//! Per-path request queue.
//!
//! # Responsibilities
//! - Keep one FIFO lane per route key
//! - Process a lane's requests one at a time, in arrival order
//! - Let different keys make progress concurrently
//!
//! # Design Decisions
//! - A lane is `Idle` or `Draining`. The request that finds it `Idle` spawns
//!   the drain task; later arrivals only append to the lane's next batch
//! - The drain task swaps the batch out under the map lock, processes it
//!   without holding any lock, and repeats until the batch comes back empty
//! - Idle lanes with nothing queued are removed, so the map does not grow
//!   with every path ever requested
//! - Jobs only need `Send`; request bodies are not `Sync`
//!
//! # Lane States
//! ```text
//! Idle ──enqueue──▶ Draining ──batch empty──▶ Idle (removed)
//!                      ▲   │
//!                      └───┘ next batch
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::BoxFuture;

/// Processes one queued job for a route key.
pub trait Drain: Send + Sync + 'static {
    type Job: Send + 'static;

    fn process<'a>(&'a self, key: &'a str, job: Self::Job) -> BoxFuture<'a, ()>;
}

/// Whether a lane currently has a drain task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LaneState {
    #[default]
    Idle,
    Draining,
}

struct Lane<J> {
    state: LaneState,
    next: Vec<J>,
}

impl<J> Default for Lane<J> {
    fn default() -> Self {
        Self {
            state: LaneState::Idle,
            next: Vec::new(),
        }
    }
}

pub struct RequestQueue<P: Drain> {
    lanes: Mutex<HashMap<String, Lane<P::Job>>>,
    processor: Arc<P>,
}

impl<P: Drain> RequestQueue<P> {
    pub fn new(processor: Arc<P>) -> Arc<Self> {
        Arc::new(Self {
            lanes: Mutex::new(HashMap::new()),
            processor,
        })
    }

    pub fn processor(&self) -> &Arc<P> {
        &self.processor
    }

    fn lanes(&self) -> MutexGuard<'_, HashMap<String, Lane<P::Job>>> {
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `job` to its lane, starting a drain if none is running.
    pub fn enqueue(self: &Arc<Self>, key: String, job: P::Job) {
        let start = {
            let mut lanes = self.lanes();
            let lane = lanes.entry(key.clone()).or_default();
            lane.next.push(job);
            if lane.state == LaneState::Idle {
                lane.state = LaneState::Draining;
                true
            } else {
                false
            }
        };

        if start {
            let queue = Arc::clone(self);
            tokio::spawn(async move { queue.drain(key).await });
        }
    }

    async fn drain(&self, key: String) {
        loop {
            let batch = {
                let mut lanes = self.lanes();
                let Some(lane) = lanes.get_mut(&key) else {
                    return;
                };
                if lane.next.is_empty() {
                    // Idle and empty: drop the lane under the same lock.
                    lanes.remove(&key);
                    return;
                }
                std::mem::take(&mut lane.next)
            };

            tracing::trace!(key = %key, batch = batch.len(), "Draining lane");
            for job in batch {
                self.processor.process(&key, job).await;
            }
        }
    }

    pub fn lane_state(&self, key: &str) -> LaneState {
        self.lanes()
            .get(key)
            .map(|lane| lane.state)
            .unwrap_or_default()
    }

    /// Jobs waiting behind the one being processed.
    pub fn pending(&self, key: &str) -> usize {
        self.lanes().get(key).map(|lane| lane.next.len()).unwrap_or(0)
    }

    pub fn lane_count(&self) -> usize {
        self.lanes().len()
    }
}
