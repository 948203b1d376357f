//! Leader election over a session-bound lock.
//!
//! # Responsibilities
//! - Keep one supervising task trying to hold the election key
//! - Expose the leadership flag and the current leader identity
//! - Release the key and stop on request
//!
//! # Design Decisions
//! - Acquisition errors are logged and retried after a fixed delay
//! - Losing the session is not an error: the task drops back to candidate
//!   and competes again immediately
//! - `stop()` returns only after the task has released the key

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::ElectionConfig;
use crate::coordination::{CoordinationClient, SessionOptions};
use crate::election::ElectionState;
use crate::lifecycle::{cancelled, Stoppable};
use crate::observability::metrics;

struct Inner {
    key: String,
    identity: String,
    state: AtomicU8,
    client: Arc<dyn CoordinationClient>,
}

impl Inner {
    fn set_state(&self, state: ElectionState) {
        self.state.store(state as u8, Ordering::SeqCst);
        metrics::record_leadership(&self.key, state == ElectionState::Leader);
    }

    fn state(&self) -> ElectionState {
        self.state.load(Ordering::SeqCst).into()
    }

    /// Session name of whoever holds the key, or an empty string.
    async fn current_leader(&self) -> String {
        let entry = match self.client.get_key(&self.key).await {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(key = %self.key, error = %e, "Leader lookup failed");
                return String::new();
            }
        };
        let Some(session) = entry.and_then(|e| e.session) else {
            return String::new();
        };
        match self.client.session_info(&session).await {
            Ok(info) => info.map(|i| i.name).unwrap_or_default(),
            Err(e) => {
                tracing::debug!(key = %self.key, error = %e, "Leader session lookup failed");
                String::new()
            }
        }
    }
}

/// A running election for one key.
pub struct Election {
    inner: Arc<Inner>,
    cancel: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Election {
    /// Start competing for `key` as `identity`.
    pub fn start(
        client: Arc<dyn CoordinationClient>,
        identity: impl Into<String>,
        key: impl Into<String>,
        config: &ElectionConfig,
    ) -> Self {
        let inner = Arc::new(Inner {
            key: key.into(),
            identity: identity.into(),
            state: AtomicU8::new(ElectionState::Candidate as u8),
            client,
        });
        let options = SessionOptions {
            name: inner.identity.clone(),
            ttl: Duration::from_secs(config.session_ttl_secs),
            lock_delay: Duration::from_secs(config.lock_delay_secs),
        };
        let retry_delay = Duration::from_millis(config.retry_delay_ms);
        let (cancel, cancel_rx) = watch::channel(false);

        tracing::info!(key = %inner.key, identity = %inner.identity, "Election started");
        metrics::record_leadership(&inner.key, false);
        let task = tokio::spawn(run(inner.clone(), options, retry_delay, cancel_rx));

        Self {
            inner,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    /// True while this process holds the election key.
    pub fn is_leader(&self) -> bool {
        self.inner.state() == ElectionState::Leader
    }

    pub fn state(&self) -> ElectionState {
        self.inner.state()
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn identity(&self) -> &str {
        &self.inner.identity
    }

    /// Identity of the current leader as reported by the backend. Empty when
    /// nobody holds the key or the backend cannot be reached.
    pub async fn current_leader(&self) -> String {
        self.inner.current_leader().await
    }

    /// Stop competing and release the key if held.
    ///
    /// Idempotent. Returns once the supervising task has exited.
    pub async fn stop(&self) {
        self.cancel.send_replace(true);
        let task = self.task.lock().expect("election mutex poisoned").take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(key = %self.inner.key, error = %e, "Election task failed");
            }
        }
        self.inner.set_state(ElectionState::Stopped);
    }
}

#[async_trait]
impl Stoppable for Election {
    fn name(&self) -> &str {
        "election"
    }

    async fn stop(&self) {
        Election::stop(self).await;
    }
}

async fn run(
    inner: Arc<Inner>,
    options: SessionOptions,
    retry_delay: Duration,
    mut cancel: watch::Receiver<bool>,
) {
    let key = inner.key.as_str();

    loop {
        if *cancel.borrow() {
            break;
        }

        let leader = inner.current_leader().await;
        if leader.is_empty() {
            tracing::info!(key, "No leader found, starting election");
        } else {
            tracing::info!(key, leader = %leader, "Leader is known");
        }

        match inner.client.acquire_lock(key, &options, cancel.clone()).await {
            Ok(Some(mut lock)) => {
                inner.set_state(ElectionState::Leader);
                tracing::info!(key, identity = %inner.identity, "Acting as elected leader");

                let stopped = tokio::select! {
                    biased;
                    _ = cancelled(&mut cancel) => true,
                    _ = lock.lost() => false,
                };

                inner.set_state(ElectionState::Candidate);
                if !stopped {
                    tracing::warn!(key, "Leadership lost, releasing lock");
                }
                if let Err(e) = inner.client.release_lock(lock).await {
                    tracing::warn!(key, error = %e, "Failed to release election lock");
                }
                if stopped {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(key, error = %e, delay = ?retry_delay, "Failed to acquire election lock, retrying");
                tokio::select! {
                    biased;
                    _ = cancelled(&mut cancel) => break,
                    _ = tokio::time::sleep(retry_delay) => {}
                }
            }
        }
    }

    tracing::info!(key, "Election stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::MemoryCoordinator;

    const KEY: &str = "xmicro/election/checkout";

    fn config() -> ElectionConfig {
        ElectionConfig {
            retry_delay_ms: 20,
            ..ElectionConfig::default()
        }
    }

    async fn eventually(cond: impl Fn() -> bool) {
        for _ in 0..300 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_single_candidate_leads_and_stops() {
        let backend = Arc::new(MemoryCoordinator::new());
        let election = Election::start(backend.clone(), "checkout-v2", KEY, &config());

        eventually(|| election.is_leader()).await;
        assert_eq!(election.state(), ElectionState::Leader);
        assert_eq!(election.current_leader().await, "checkout-v2");
        assert_eq!(backend.lock_holder(KEY).as_deref(), Some("checkout-v2"));

        election.stop().await;
        assert_eq!(election.state(), ElectionState::Stopped);
        assert!(!election.is_leader());
        assert_eq!(election.current_leader().await, "");
        assert_eq!(backend.lock_holder(KEY), None);
        assert_eq!(backend.session_count(), 0);

        // Second stop is a no-op.
        election.stop().await;
    }

    #[tokio::test]
    async fn test_contention_and_handover() {
        let backend = Arc::new(MemoryCoordinator::new());
        let a = Election::start(backend.clone(), "node-a", KEY, &config());
        eventually(|| a.is_leader()).await;

        let b = Election::start(backend.clone(), "node-b", KEY, &config());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!b.is_leader());
        assert_eq!(b.state(), ElectionState::Candidate);
        assert_eq!(b.current_leader().await, "node-a");

        a.stop().await;
        eventually(|| b.is_leader()).await;
        assert_eq!(a.current_leader().await, "node-b");

        b.stop().await;
    }

    #[tokio::test]
    async fn test_session_loss_demotes_then_reacquires() {
        let backend = Arc::new(MemoryCoordinator::new());
        let election = Election::start(backend.clone(), "node-a", KEY, &config());
        eventually(|| election.is_leader()).await;

        let first = backend.get_key(KEY).await.unwrap().unwrap().session.unwrap();
        backend.expire_session(&first);

        eventually(|| {
            let holder = backend.lock_holder(KEY);
            holder.as_deref() == Some("node-a")
        })
        .await;
        eventually(|| election.is_leader()).await;
        let second = backend.get_key(KEY).await.unwrap().unwrap().session.unwrap();
        assert_ne!(first, second);

        election.stop().await;
    }

    #[tokio::test]
    async fn test_stop_while_candidate() {
        let backend = Arc::new(MemoryCoordinator::new());
        backend.hold_lock(KEY, "someone-else").unwrap();

        let election = Election::start(backend.clone(), "node-a", KEY, &config());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(election.state(), ElectionState::Candidate);

        tokio::time::timeout(Duration::from_secs(2), election.stop())
            .await
            .expect("stop hung");
        assert_eq!(election.state(), ElectionState::Stopped);
        assert_eq!(backend.lock_holder(KEY).as_deref(), Some("someone-else"));
        assert_eq!(backend.session_count(), 1);
    }
}
