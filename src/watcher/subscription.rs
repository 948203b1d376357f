//! Long-poll subscriptions on the coordination backend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::WatchConfig;
use crate::coordination::{CoordinationClient, WatchSpec};
use crate::lifecycle::cancelled;
use crate::resilience::Backoff;

/// Callback invoked once per observed change.
#[async_trait]
pub trait WatchHandler: Send + Sync {
    async fn handle(&self, index: u64, payload: &serde_json::Value);
}

/// Identifier returned by [`Watcher::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    spec: WatchSpec,
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Owner of a set of subscriptions that are stopped together.
pub struct Watcher {
    client: Arc<dyn CoordinationClient>,
    config: WatchConfig,
    next_id: AtomicU64,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl Watcher {
    pub fn new(client: Arc<dyn CoordinationClient>, config: WatchConfig) -> Self {
        Self {
            client,
            config,
            next_id: AtomicU64::new(1),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Start watching `spec`. The handler fires for the initial state too.
    pub fn subscribe(&self, spec: WatchSpec, handler: Arc<dyn WatchHandler>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (cancel, cancel_rx) = watch::channel(false);

        let task = tokio::spawn(run_subscription(
            self.client.clone(),
            spec.clone(),
            handler,
            cancel_rx,
            Backoff::new(self.config.retry_base_ms, self.config.retry_max_ms),
        ));

        tracing::info!(subscription = id.0, watch = %spec, "Subscription started");
        self.subscriptions
            .lock()
            .expect("watcher mutex poisoned")
            .push(Subscription {
                id,
                spec,
                cancel,
                task,
            });
        id
    }

    /// Number of running subscriptions.
    pub fn active(&self) -> usize {
        self.subscriptions
            .lock()
            .expect("watcher mutex poisoned")
            .len()
    }

    /// Cancel every subscription and wait until all of them have exited.
    pub async fn stop_all(&self) {
        let subscriptions: Vec<Subscription> = self
            .subscriptions
            .lock()
            .expect("watcher mutex poisoned")
            .drain(..)
            .collect();

        for sub in &subscriptions {
            sub.cancel.send_replace(true);
        }
        for sub in subscriptions {
            if let Err(e) = sub.task.await {
                tracing::warn!(subscription = sub.id.0, watch = %sub.spec, error = %e, "Subscription task failed");
            } else {
                tracing::info!(subscription = sub.id.0, watch = %sub.spec, "Subscription stopped");
            }
        }
    }
}

async fn run_subscription(
    client: Arc<dyn CoordinationClient>,
    spec: WatchSpec,
    handler: Arc<dyn WatchHandler>,
    mut cancel: watch::Receiver<bool>,
    mut backoff: Backoff,
) {
    let mut last_index = 0u64;

    loop {
        let result = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => break,
            result = client.wait_for_change(&spec, last_index) => result,
        };

        match result {
            Ok(event) => {
                backoff.reset();
                if event.index == last_index {
                    continue;
                }
                // Index going backwards means the backend state was reset.
                last_index = if event.index < last_index { 0 } else { event.index };
                tracing::debug!(watch = %spec, index = event.index, "Change observed");
                handler.handle(event.index, &event.payload).await;
            }
            Err(e) => {
                let delay = backoff.next_delay();
                tracing::warn!(
                    watch = %spec,
                    attempt = backoff.attempt(),
                    delay = ?delay,
                    error = %e,
                    "Watch failed, retrying"
                );
                tokio::select! {
                    biased;
                    _ = cancelled(&mut cancel) => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
