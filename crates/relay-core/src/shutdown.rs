//! Cooperative shutdown shared by the relay and send loops.

use tokio::sync::watch;

#[cfg(test)]
#[path = "shutdown_tests.rs"]
mod tests;

/// Owner side of the shutdown signal
///
/// Dropping the `Shutdown` without calling [`Shutdown::trigger`] also counts
/// as a shutdown for every listener.
#[derive(Debug)]
pub struct Shutdown {
    sender: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    /// Ask every listener to stop. Idempotent.
    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }

    /// Create a listener
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Listener side of the shutdown signal
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow() || self.receiver.has_changed().is_err()
    }

    /// Resolve once shutdown has been requested
    pub async fn triggered(&mut self) {
        // an error means the owner is gone, which is also a shutdown
        let _ = self.receiver.wait_for(|stopping| *stopping).await;
    }
}
