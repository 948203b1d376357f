//! Shutdown coordination.

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};

/// Coordinator for graceful shutdown of the HTTP listeners.
///
/// Provides a broadcast channel that all long-running tasks can subscribe to.
pub struct Shutdown {
    /// Broadcast channel sender.
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Get the number of active subscribers (tasks still running).
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve once a cancellation flag is set or its sender is gone.
pub async fn cancelled(flag: &mut watch::Receiver<bool>) {
    while !*flag.borrow_and_update() {
        if flag.changed().await.is_err() {
            return;
        }
    }
}

/// A background subsystem that must be stopped before exit.
#[async_trait]
pub trait Stoppable: Send + Sync {
    /// Name used in shutdown logs.
    fn name(&self) -> &str;

    /// Stop the subsystem. Resolves once its tasks have acknowledged.
    async fn stop(&self);
}

/// Stop each subsystem in order, waiting for each one.
pub async fn stop_all(subsystems: &[&dyn Stoppable]) {
    for subsystem in subsystems {
        tracing::info!(subsystem = subsystem.name(), "Stopping");
        subsystem.stop().await;
        tracing::info!(subsystem = subsystem.name(), "Stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder<'a> {
        name: &'static str,
        log: &'a Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl Stoppable for Recorder<'_> {
        fn name(&self) -> &str {
            self.name
        }

        async fn stop(&self) {
            tokio::task::yield_now().await;
            self.log.lock().unwrap().push(self.name);
        }
    }

    #[tokio::test]
    async fn test_trigger_reaches_subscribers() {
        let shutdown = Shutdown::new();
        let mut a = shutdown.subscribe();
        let mut b = shutdown.subscribe();
        assert_eq!(shutdown.receiver_count(), 2);

        shutdown.trigger();
        assert!(a.recv().await.is_ok());
        assert!(b.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_cancelled() {
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move { cancelled(&mut rx).await });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        tx.send_replace(true);
        waiter.await.unwrap();

        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        cancelled(&mut rx).await;
    }

    #[tokio::test]
    async fn test_stop_all_in_order() {
        let log = Mutex::new(Vec::new());
        let election = Recorder { name: "election", log: &log };
        let dispatcher = Recorder { name: "dispatcher", log: &log };

        stop_all(&[&election, &dispatcher]).await;
        assert_eq!(*log.lock().unwrap(), vec!["election", "dispatcher"]);
    }
}
