//! Online/offline reporting.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::remote::Remote;

/// Shared reachability state. Cloning shares the same channel.
#[derive(Clone)]
pub struct Reachability {
    tx: watch::Sender<bool>,
}

impl Reachability {
    /// Starts out optimistic: online until a probe says otherwise.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(true);
        Reachability { tx }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });
        if changed {
            info!(online, "reachability changed");
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Poll the backend health endpoint every `interval` until aborted.
    pub fn spawn_probe(&self, remote: Remote, interval: Duration) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let result = remote.health().await;
                if let Err(e) = &result {
                    debug!(error = %e, "health probe failed");
                }
                this.set_online(result.is_ok());
            }
        })
    }
}

impl Default for Reachability {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::MemoryBackend;
    use std::sync::Arc;

    #[test]
    fn test_set_online_notifies_once() {
        let reach = Reachability::new();
        let mut rx = reach.subscribe();
        assert!(reach.is_online());

        reach.set_online(false);
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        reach.set_online(false);
        assert!(!rx.has_changed().unwrap());
        assert!(!reach.is_online());
    }

    #[tokio::test]
    async fn test_probe_reports_offline_backend() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_offline(true);
        let remote = Remote::new(backend.clone());

        let reach = Reachability::new();
        let mut rx = reach.subscribe();
        let probe = reach.spawn_probe(remote, Duration::from_millis(10));

        rx.changed().await.unwrap();
        assert!(!reach.is_online());

        backend.set_offline(false);
        rx.changed().await.unwrap();
        assert!(reach.is_online());
        probe.abort();
    }
}
