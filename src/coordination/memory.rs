//! In-process coordination backend.
//!
//! Implements the full `CoordinationClient` contract against process memory:
//! catalog with per-instance health, KV with session-held locks, sessions
//! that can be expired on demand, and index-based long polls. Used as the
//! deterministic backend in tests; lock delay is not simulated.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use async_trait::async_trait;
use serde_json::json;
use tokio::sync::watch;
use uuid::Uuid;

use crate::coordination::types::{
    CoordinationError, CoordinationResult, KeyEntry, LockHandle, ServiceInstance, SessionInfo,
    SessionOptions, WatchEvent, WatchSpec,
};
use crate::coordination::CoordinationClient;

struct SessionRecord {
    name: String,
    lost: watch::Sender<bool>,
}

#[derive(Default)]
struct State {
    /// service -> [(instance, passing)]
    services: BTreeMap<String, Vec<(ServiceInstance, bool)>>,
    kv: BTreeMap<String, KeyEntry>,
    sessions: HashMap<String, SessionRecord>,
    fail_session_lookups: bool,
}

/// Coordination backend living entirely in memory.
pub struct MemoryCoordinator {
    state: Mutex<State>,
    catalog_index: watch::Sender<u64>,
    kv_index: watch::Sender<u64>,
    /// Long-poll timeout.
    wait: Duration,
}

impl MemoryCoordinator {
    /// Create an empty backend with a 5 second long-poll timeout.
    pub fn new() -> Self {
        Self::with_wait(Duration::from_secs(5))
    }

    /// Create an empty backend with a custom long-poll timeout.
    pub fn with_wait(wait: Duration) -> Self {
        let (catalog_index, _) = watch::channel(1);
        let (kv_index, _) = watch::channel(1);
        Self {
            state: Mutex::new(State::default()),
            catalog_index,
            kv_index,
            wait,
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("memory coordinator mutex poisoned")
    }

    fn bump_catalog(&self) {
        self.catalog_index.send_modify(|i| *i += 1);
    }

    fn bump_kv(&self) {
        self.kv_index.send_modify(|i| *i += 1);
    }

    /// Register a passing instance.
    pub fn register(&self, instance: ServiceInstance) {
        self.register_with_health(instance, true);
    }

    /// Register an instance with an explicit health status.
    pub fn register_with_health(&self, instance: ServiceInstance, passing: bool) {
        {
            let mut state = self.state();
            let instances = state.services.entry(instance.service.clone()).or_default();
            instances.retain(|(existing, _)| existing.id != instance.id);
            instances.push((instance, passing));
        }
        self.bump_catalog();
    }

    /// Change the health status of a registered instance.
    pub fn set_passing(&self, service: &str, id: &str, passing: bool) {
        {
            let mut state = self.state();
            if let Some(instances) = state.services.get_mut(service) {
                for (instance, health) in instances.iter_mut() {
                    if instance.id == id {
                        *health = passing;
                    }
                }
            }
        }
        self.bump_catalog();
    }

    /// Remove an instance. The service disappears with its last instance.
    pub fn deregister(&self, service: &str, id: &str) {
        {
            let mut state = self.state();
            if let Some(instances) = state.services.get_mut(service) {
                instances.retain(|(instance, _)| instance.id != id);
                if instances.is_empty() {
                    state.services.remove(service);
                }
            }
        }
        self.bump_catalog();
    }

    /// Write a plain key.
    pub fn put_key(&self, key: &str, value: &[u8]) {
        {
            let mut state = self.state();
            let entry = state.kv.entry(key.to_string()).or_insert_with(|| KeyEntry {
                key: key.to_string(),
                ..KeyEntry::default()
            });
            entry.value = Some(value.to_vec());
        }
        self.bump_kv();
    }

    /// Create a session registered as `name` and return its id.
    pub fn create_session(&self, name: &str) -> String {
        self.insert_session(name).0
    }

    fn insert_session(&self, name: &str) -> (String, watch::Receiver<bool>) {
        let id = Uuid::new_v4().to_string();
        let (lost, lost_rx) = watch::channel(false);
        self.state().sessions.insert(
            id.clone(),
            SessionRecord {
                name: name.to_string(),
                lost,
            },
        );
        (id, lost_rx)
    }

    /// Make a peer registered as `name` hold the lock on `key`.
    ///
    /// Returns the holding session id, or `None` when the key is already held.
    pub fn hold_lock(&self, key: &str, name: &str) -> Option<String> {
        let (id, _) = self.insert_session(name);
        let acquired = {
            let mut state = self.state();
            let entry = state.kv.entry(key.to_string()).or_insert_with(|| KeyEntry {
                key: key.to_string(),
                ..KeyEntry::default()
            });
            if entry.session.is_none() {
                entry.session = Some(id.clone());
                true
            } else {
                state.sessions.remove(&id);
                false
            }
        };
        if acquired {
            self.bump_kv();
            Some(id)
        } else {
            None
        }
    }

    /// Invalidate a session: its locks are released and holders notified.
    pub fn expire_session(&self, session_id: &str) {
        {
            let mut state = self.state();
            if let Some(record) = state.sessions.remove(session_id) {
                record.lost.send_replace(true);
            }
            for entry in state.kv.values_mut() {
                if entry.session.as_deref() == Some(session_id) {
                    entry.session = None;
                }
            }
        }
        self.bump_kv();
    }

    /// Make every subsequent `session_info` call fail (or succeed again).
    pub fn fail_session_lookups(&self, fail: bool) {
        self.state().fail_session_lookups = fail;
    }

    /// Name of the session currently holding `key`, if any.
    pub fn lock_holder(&self, key: &str) -> Option<String> {
        let state = self.state();
        let session = state.kv.get(key)?.session.as_ref()?;
        state.sessions.get(session).map(|s| s.name.clone())
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.state().sessions.len()
    }

    fn try_lock(&self, key: &str, session_id: &str) -> bool {
        let acquired = {
            let mut state = self.state();
            let entry = state.kv.entry(key.to_string()).or_insert_with(|| KeyEntry {
                key: key.to_string(),
                ..KeyEntry::default()
            });
            if entry.session.is_none() {
                entry.session = Some(session_id.to_string());
                true
            } else {
                false
            }
        };
        if acquired {
            self.bump_kv();
        }
        acquired
    }

    fn destroy_session(&self, session_id: &str) {
        self.state().sessions.remove(session_id);
    }

    fn payload(&self, spec: &WatchSpec) -> serde_json::Value {
        let state = self.state();
        match spec {
            WatchSpec::Catalog => {
                let services: BTreeMap<&String, Vec<&String>> = state
                    .services
                    .iter()
                    .map(|(name, instances)| {
                        let mut tags: Vec<&String> =
                            instances.iter().flat_map(|(i, _)| i.tags.iter()).collect();
                        tags.sort();
                        tags.dedup();
                        (name, tags)
                    })
                    .collect();
                json!(services)
            }
            WatchSpec::KeyPrefix(prefix) => {
                let entries: Vec<serde_json::Value> = state
                    .kv
                    .values()
                    .filter(|entry| entry.key.starts_with(prefix.as_str()))
                    .map(|entry| json!({ "Key": entry.key, "Session": entry.session }))
                    .collect();
                json!(entries)
            }
        }
    }
}

impl Default for MemoryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordinationClient for MemoryCoordinator {
    async fn list_services(&self) -> CoordinationResult<BTreeMap<String, Vec<String>>> {
        let state = self.state();
        Ok(state
            .services
            .iter()
            .map(|(name, instances)| {
                let mut tags: Vec<String> =
                    instances.iter().flat_map(|(i, _)| i.tags.iter().cloned()).collect();
                tags.sort();
                tags.dedup();
                (name.clone(), tags)
            })
            .collect())
    }

    async fn healthy_instances(&self, service: &str) -> CoordinationResult<Vec<ServiceInstance>> {
        let state = self.state();
        Ok(state
            .services
            .get(service)
            .map(|instances| {
                instances
                    .iter()
                    .filter(|(_, passing)| *passing)
                    .map(|(instance, _)| instance.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_key(&self, key: &str) -> CoordinationResult<Option<KeyEntry>> {
        Ok(self.state().kv.get(key).cloned())
    }

    async fn session_info(&self, session_id: &str) -> CoordinationResult<Option<SessionInfo>> {
        let state = self.state();
        if state.fail_session_lookups {
            return Err(CoordinationError::Session {
                id: session_id.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(state.sessions.get(session_id).map(|record| SessionInfo {
            id: session_id.to_string(),
            name: record.name.clone(),
        }))
    }

    async fn acquire_lock(
        &self,
        key: &str,
        options: &SessionOptions,
        mut cancel: watch::Receiver<bool>,
    ) -> CoordinationResult<Option<LockHandle>> {
        let mut kv_rx = self.kv_index.subscribe();
        let (session_id, lost) = self.insert_session(&options.name);

        loop {
            if *cancel.borrow() {
                self.destroy_session(&session_id);
                return Ok(None);
            }
            if self.try_lock(key, &session_id) {
                return Ok(Some(LockHandle::new(key, session_id, lost)));
            }
            tokio::select! {
                _ = kv_rx.changed() => {}
                changed = cancel.changed() => {
                    if changed.is_err() {
                        self.destroy_session(&session_id);
                        return Ok(None);
                    }
                }
            }
        }
    }

    async fn release_lock(&self, mut lock: LockHandle) -> CoordinationResult<()> {
        lock.stop_monitor();
        {
            let mut state = self.state();
            if let Some(entry) = state.kv.get_mut(&lock.key) {
                if entry.session.as_deref() == Some(lock.session_id.as_str()) {
                    entry.session = None;
                }
            }
            state.sessions.remove(&lock.session_id);
        }
        self.bump_kv();
        Ok(())
    }

    async fn wait_for_change(&self, spec: &WatchSpec, index: u64) -> CoordinationResult<WatchEvent> {
        let mut rx = match spec {
            WatchSpec::Catalog => self.catalog_index.subscribe(),
            WatchSpec::KeyPrefix(_) => self.kv_index.subscribe(),
        };
        let current = *rx.borrow_and_update();
        if current == index {
            tokio::select! {
                _ = rx.changed() => {}
                _ = tokio::time::sleep(self.wait) => {}
            }
        }
        let index = *rx.borrow();
        Ok(WatchEvent {
            index,
            payload: self.payload(spec),
        })
    }
}
