//! Hub lifecycle state shared through a watch channel.
//!
//! [`StateCell`] owns the single source of truth; every long-running task
//! holds a [`ShutdownSignal`] it can poll lock-free or await.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Lifecycle of a hub. Transitions only go `Running → Stopping → Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HubState {
    /// Accepting connections and relaying messages.
    Running,
    /// Shutdown has begun; new connections are refused.
    Stopping,
    /// All tasks have finished.
    Stopped,
}

/// Owner of the hub state.
#[derive(Debug)]
pub struct StateCell {
    tx: watch::Sender<HubState>,
}

impl StateCell {
    /// Creates a cell in the [`HubState::Running`] state.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(HubState::Running);
        Self { tx }
    }

    /// Returns the current state.
    #[must_use]
    pub fn current(&self) -> HubState {
        *self.tx.borrow()
    }

    /// Moves `Running → Stopping`. Returns `false` if shutdown had already begun.
    pub fn begin_stop(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == HubState::Running {
                *state = HubState::Stopping;
                true
            } else {
                false
            }
        })
    }

    /// Moves `Stopping → Stopped`. Has no effect in any other state.
    pub fn finish_stop(&self) {
        self.tx.send_if_modified(|state| {
            if *state == HubState::Stopping {
                *state = HubState::Stopped;
                true
            } else {
                false
            }
        });
    }

    /// Returns a signal that resolves once the hub leaves `Running`.
    #[must_use]
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Read side of [`StateCell`] held by background tasks.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<HubState>,
}

impl ShutdownSignal {
    /// Returns `true` while the hub is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        *self.rx.borrow() == HubState::Running
    }

    /// Waits until the hub leaves `Running`.
    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|state| *state != HubState::Running).await;
    }
}
