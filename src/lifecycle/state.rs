//! Server lifecycle states.
//!
//! ```text
//! Created → Listening → Draining → Closed
//!    └────────────────────────────────┘   (close before listen)
//! ```

/// Where a server is in its lifecycle. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    #[default]
    Created,
    Listening,
    Draining,
    Closed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Created => "created",
            LifecycleState::Listening => "listening",
            LifecycleState::Draining => "draining",
            LifecycleState::Closed => "closed",
        }
    }

    /// True once a close has been requested.
    pub fn is_closing(&self) -> bool {
        matches!(self, LifecycleState::Draining | LifecycleState::Closed)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
