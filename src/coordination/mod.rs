//! Coordination backend access.
//!
//! # Data Flow
//! ```text
//! Registry.refresh()  ──▶ list_services / healthy_instances / get_key / session_info
//! Election loop       ──▶ acquire_lock ──▶ LockHandle (lost channel) ──▶ release_lock
//! Watcher tasks       ──▶ wait_for_change (long poll, index based)
//!                              │
//!                              ▼
//!                 consul.rs (HTTP API)  |  memory.rs (in-process)
//! ```
//!
//! # Design Decisions
//! - Everything above this module sees only the `CoordinationClient` trait
//! - Linearizable lock semantics are delegated to the backend
//! - Long polls return the same index on timeout; callers decide what a change is

use std::collections::BTreeMap;
use async_trait::async_trait;
use tokio::sync::watch;

pub mod consul;
pub mod memory;
pub mod types;

pub use consul::ConsulClient;
pub use memory::MemoryCoordinator;
pub use types::{
    CoordinationError, CoordinationResult, KeyEntry, LockHandle, ServiceInstance, SessionInfo,
    SessionOptions, WatchEvent, WatchSpec,
};

/// Primitives consumed from the coordination backend.
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// List all catalog services with their tags.
    async fn list_services(&self) -> CoordinationResult<BTreeMap<String, Vec<String>>>;

    /// List the instances of `service` passing their health checks.
    async fn healthy_instances(&self, service: &str) -> CoordinationResult<Vec<ServiceInstance>>;

    /// Read a key. `None` when the key does not exist.
    async fn get_key(&self, key: &str) -> CoordinationResult<Option<KeyEntry>>;

    /// Look up a session. `None` when the session does not exist (anymore).
    async fn session_info(&self, session_id: &str) -> CoordinationResult<Option<SessionInfo>>;

    /// Acquire the lock on `key` under a fresh session.
    ///
    /// Blocks until the lock is held or `cancel` flips to `true`, in which
    /// case `Ok(None)` is returned and any session created for the attempt
    /// is cleaned up.
    async fn acquire_lock(
        &self,
        key: &str,
        options: &SessionOptions,
        cancel: watch::Receiver<bool>,
    ) -> CoordinationResult<Option<LockHandle>>;

    /// Release a held lock and destroy its session.
    async fn release_lock(&self, lock: LockHandle) -> CoordinationResult<()>;

    /// Long-poll `spec` for a state newer than `index`.
    async fn wait_for_change(&self, spec: &WatchSpec, index: u64) -> CoordinationResult<WatchEvent>;
}
