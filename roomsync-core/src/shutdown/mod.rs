//! Room shutdown coordination
//!
//! Every task spawned for an open room holds a [`ShutdownListener`] and
//! selects on it at each suspension point. Closing the room triggers the
//! coordinator once; listeners observe it immediately and also treat a
//! dropped coordinator as a shutdown.

use tokio::sync::watch;
use tracing::{debug, info};

/// Shutdown state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Shutdown,
}

/// Per-room shutdown coordinator
#[derive(Debug)]
pub struct ShutdownCoordinator {
    tx: watch::Sender<bool>,
    scope: String,
}

impl ShutdownCoordinator {
    /// Create a new coordinator; `scope` names the owner in logs
    pub fn new(scope: impl Into<String>) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            tx,
            scope: scope.into(),
        }
    }

    /// Subscribe to shutdown notifications
    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }

    /// Signal shutdown to every listener.
    ///
    /// Returns `false` if shutdown had already been triggered.
    pub fn trigger(&self) -> bool {
        let first = !self.tx.send_replace(true);
        if first {
            info!(scope = %self.scope, "Shutdown triggered");
        } else {
            debug!(scope = %self.scope, "Shutdown already in progress");
        }
        first
    }

    /// Get current state
    pub fn state(&self) -> ShutdownState {
        if *self.tx.borrow() {
            ShutdownState::Shutdown
        } else {
            ShutdownState::Running
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.state() == ShutdownState::Shutdown
    }
}

/// Receiving side of a [`ShutdownCoordinator`]
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl ShutdownListener {
    /// Resolves once shutdown has been triggered or the coordinator is gone
    pub async fn wait(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }
}
