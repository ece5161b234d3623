//! Agent lifecycle state machine

use std::fmt;
use tokio::sync::watch;
use tracing::{debug, warn};

/// `disconnected → connecting → configuring → running → draining → stopped`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Disconnected,
    Connecting,
    Configuring,
    Running,
    Draining,
    Stopped,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Disconnected => "disconnected",
            LifecycleState::Connecting => "connecting",
            LifecycleState::Configuring => "configuring",
            LifecycleState::Running => "running",
            LifecycleState::Draining => "draining",
            LifecycleState::Stopped => "stopped",
        }
    }

    /// Whether `self → next` is a legal step
    pub fn can_advance_to(&self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Configuring)
                | (Connecting, Stopped)
                | (Configuring, Running)
                | (Configuring, Draining)
                | (Running, Draining)
                | (Draining, Stopped)
        )
    }

    pub fn is_terminal(&self) -> bool {
        *self == LifecycleState::Stopped
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current state, observable through a `watch` channel
pub(crate) struct Lifecycle {
    agent: String,
    tx: watch::Sender<LifecycleState>,
}

impl Lifecycle {
    pub(crate) fn new(agent: impl Into<String>) -> Self {
        let (tx, _rx) = watch::channel(LifecycleState::Disconnected);
        Self { agent: agent.into(), tx }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.tx.subscribe()
    }

    pub(crate) fn current(&self) -> LifecycleState {
        *self.tx.borrow()
    }

    /// Move to `next`; illegal steps are logged and ignored
    pub(crate) fn advance(&self, next: LifecycleState) -> bool {
        let current = self.current();
        if !current.can_advance_to(next) {
            warn!(agent = %self.agent, from = %current, to = %next, "Ignoring illegal lifecycle transition");
            return false;
        }
        debug!(agent = %self.agent, from = %current, to = %next, "Lifecycle transition");
        self.tx.send_replace(next);
        true
    }
}
