//! Supervised service lifecycle.
//!
//! The controller moves through `New → Starting → Running → Stopping →
//! Terminated`; any startup failure lands in `Failed`. The current state is
//! published through a watch channel so tests and health endpoints can
//! observe transitions.

use tokio::sync::watch;

/// Lifecycle state of the controller service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Constructed, not yet started.
    New,
    /// Running filesystem migration, ring join and the initial sync.
    Starting,
    /// Serving traffic and running periodic loops.
    Running,
    /// Shutting down: stopping instances and leaving the ring.
    Stopping,
    /// Cleanly stopped.
    Terminated,
    /// Startup failed; the service never reached `Running`.
    Failed,
}

/// Observable lifecycle cell.
#[derive(Debug)]
pub struct LifecycleCell {
    tx: watch::Sender<ServiceState>,
}

impl Default for LifecycleCell {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleCell {
    /// Creates a cell in the `New` state.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ServiceState::New);
        Self { tx }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ServiceState {
        *self.tx.borrow()
    }

    /// Publishes a new state.
    pub fn set(&self, state: ServiceState) {
        tracing::debug!(?state, "service state transition");
        let _ = self.tx.send(state);
    }

    /// Subscribes to state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ServiceState> {
        self.tx.subscribe()
    }
}
