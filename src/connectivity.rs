//! Online/offline signal. The app shell feeds platform connectivity events
//! into the watcher; the sync engine and privacy controller read it. There is
//! deliberately no debounce: every transition is forwarded, matching the
//! browser `online` event behavior this replaces.

use tokio::sync::watch;

#[derive(Clone)]
pub struct ConnectivityWatcher {
    tx: watch::Sender<bool>,
}

impl ConnectivityWatcher {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_online);
        Self { tx }
    }

    pub fn online(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn set_online(&self, online: bool) {
        let previous = *self.tx.borrow();
        if previous != online {
            tracing::info!(target: "clinica", event = "connectivity_changed", online);
        }
        // send_replace also wakes subscribers on redundant updates; receivers
        // see them because the platform signal can flap.
        self.tx.send_replace(online);
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for ConnectivityWatcher {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transitions_are_observable() {
        let watcher = ConnectivityWatcher::new(false);
        let mut rx = watcher.subscribe();
        assert!(!watcher.online());

        watcher.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
        assert!(watcher.online());
    }
}
