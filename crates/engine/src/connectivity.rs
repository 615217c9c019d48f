//! Connectivity signal shared between the foreground engine and the
//! background replay worker.

use tokio::sync::watch;

use grovesync_core::sync::ConnectivityState;

/// Broadcasts online/offline transitions from the host environment.
///
/// Cloning is cheap; all clones share the same channel.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    tx: watch::Sender<ConnectivityState>,
}

impl ConnectivityMonitor {
    pub fn new(initial: ConnectivityState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn current(&self) -> ConnectivityState {
        *self.tx.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.current().is_online()
    }

    /// Report a connectivity change. Subscribers only wake on actual
    /// transitions; repeating the current state is a no-op.
    pub fn set_state(&self, state: ConnectivityState) {
        self.tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    pub fn set_online(&self) {
        self.set_state(ConnectivityState::Online);
    }

    pub fn set_offline(&self) {
        self.set_state(ConnectivityState::Offline);
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.tx.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(ConnectivityState::Online)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_sees_offline_to_online_transition() {
        let monitor = ConnectivityMonitor::new(ConnectivityState::Offline);
        let mut rx = monitor.subscribe();

        monitor.set_online();
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_online());
    }

    #[tokio::test]
    async fn repeated_state_does_not_wake_subscribers() {
        let monitor = ConnectivityMonitor::new(ConnectivityState::Online);
        let rx = monitor.subscribe();

        monitor.set_online();
        assert!(!rx.has_changed().unwrap());
    }
}
