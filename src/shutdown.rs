//! Graceful-shutdown signal, passed down into a connection task the same
//! way a listener hands one to each per-connection handler.

use tokio::sync::broadcast;

/// Listens for a server shutdown signal.
///
/// `shutdown` is triggered using a `broadcast::Sender`. Only one value is
/// ever sent. Once a value has been sent via the broadcast channel, the
/// task should exit its (conceptually) infinite loop and terminate.
///
/// The `Shutdown` struct listens for the signal and tracks that the signal
/// has been received. Callers may query `is_shutdown()`.
#[derive(Debug)]
pub struct Shutdown {
    is_shutdown: bool,
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    pub fn new(notify: broadcast::Receiver<()>) -> Shutdown {
        Shutdown {
            is_shutdown: false,
            notify,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown
    }

    /// Receives the shutdown notice, waiting if necessary.
    pub async fn recv(&mut self) {
        if self.is_shutdown {
            return;
        }
        // A send error means the sender was dropped, which only happens
        // when the owning connection registry itself is going away.
        let _ = self.notify.recv().await;
        self.is_shutdown = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recv_resolves_once_sender_fires() {
        let (tx, rx) = broadcast::channel(1);
        let mut shutdown = Shutdown::new(rx);
        assert!(!shutdown.is_shutdown());

        tx.send(()).unwrap();
        shutdown.recv().await;
        assert!(shutdown.is_shutdown());

        // A second recv() must return immediately, not hang.
        shutdown.recv().await;
    }
}
