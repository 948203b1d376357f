//! Backend-neutral coordination types and error definitions.

use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A single catalog instance of a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInstance {
    /// Instance identifier, unique within the service.
    pub id: String,
    /// Name of the service this instance registered under.
    pub service: String,
    /// Advertised address. May be empty when the instance did not set one.
    pub address: String,
    pub port: u16,
    pub tags: Vec<String>,
}

/// A key-value entry as seen by the coordination backend.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyEntry {
    pub key: String,
    pub value: Option<Vec<u8>>,
    /// Session currently holding the lock on this key, if any.
    pub session: Option<String>,
}

/// Registered information about a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: String,
    /// Name the session was registered with. Elections use the peer identity.
    pub name: String,
}

/// Options for the session backing a distributed lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Session name, reported as the lock owner identity.
    pub name: String,
    /// Liveness TTL. The session is invalidated when it is not renewed in time.
    pub ttl: Duration,
    /// Window during which a released lock cannot be re-acquired.
    pub lock_delay: Duration,
}

impl SessionOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ttl: Duration::from_secs(10),
            lock_delay: Duration::from_secs(5),
        }
    }
}

/// What a subscription observes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WatchSpec {
    /// Any change to the service catalog.
    Catalog,
    /// Any change to keys under the given prefix.
    KeyPrefix(String),
}

impl std::fmt::Display for WatchSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchSpec::Catalog => write!(f, "catalog"),
            WatchSpec::KeyPrefix(prefix) => write!(f, "keyprefix:{}", prefix),
        }
    }
}

/// Result of one long-poll round against a watched resource.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchEvent {
    /// Backend index of the observed state. Unchanged index means no change.
    pub index: u64,
    /// Raw observed state.
    pub payload: serde_json::Value,
}

/// A held distributed lock.
///
/// The lock-lost channel flips to `true` (or closes) when the backing
/// session is invalidated or the key is taken over. Dropping the handle
/// stops any backend monitor but does not release the lock; use
/// `CoordinationClient::release_lock` for that.
#[derive(Debug)]
pub struct LockHandle {
    pub key: String,
    pub session_id: String,
    lost: watch::Receiver<bool>,
    monitor: Option<JoinHandle<()>>,
}

impl LockHandle {
    pub fn new(key: impl Into<String>, session_id: impl Into<String>, lost: watch::Receiver<bool>) -> Self {
        Self {
            key: key.into(),
            session_id: session_id.into(),
            lost,
            monitor: None,
        }
    }

    /// Attach a backend task that keeps the session alive while the lock is held.
    pub fn with_monitor(mut self, monitor: JoinHandle<()>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Returns true once the lock has been involuntarily lost.
    pub fn is_lost(&self) -> bool {
        *self.lost.borrow() || self.lost.has_changed().is_err()
    }

    /// Wait until the lock is lost. A closed channel counts as lost.
    pub async fn lost(&mut self) {
        loop {
            if *self.lost.borrow_and_update() {
                return;
            }
            if self.lost.changed().await.is_err() {
                return;
            }
        }
    }

    /// Stop the session monitor, if any.
    pub(crate) fn stop_monitor(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.stop_monitor();
    }
}

/// Errors that can occur while talking to the coordination backend.
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// Transport-level failure.
    #[error("coordination request failed: {0}")]
    Transport(String),

    /// Backend answered with an unexpected status.
    #[error("coordination backend returned {status} for {path}")]
    Status { status: u16, path: String },

    /// Backend answered with a body that could not be decoded.
    #[error("malformed coordination response: {0}")]
    Decode(String),

    /// Session lookup failed.
    #[error("session {id} lookup failed: {reason}")]
    Session { id: String, reason: String },

    /// The session was invalidated before the lock could be acquired.
    #[error("session {0} expired before the lock was acquired")]
    SessionExpired(String),

    /// Client could not be constructed from configuration.
    #[error("invalid coordination configuration: {0}")]
    Config(String),
}

impl From<reqwest::Error> for CoordinationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            CoordinationError::Decode(err.to_string())
        } else {
            CoordinationError::Transport(err.to_string())
        }
    }
}

/// Result type for coordination operations.
pub type CoordinationResult<T> = Result<T, CoordinationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lock_handle_lost_on_signal() {
        let (tx, rx) = watch::channel(false);
        let mut handle = LockHandle::new("k", "s", rx);
        assert!(!handle.is_lost());
        tx.send(true).unwrap();
        handle.lost().await;
        assert!(handle.is_lost());
    }

    #[tokio::test]
    async fn test_lock_handle_lost_on_close() {
        let (tx, rx) = watch::channel(false);
        let mut handle = LockHandle::new("k", "s", rx);
        drop(tx);
        handle.lost().await;
        assert!(handle.is_lost());
    }
}
