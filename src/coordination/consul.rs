//! Consul HTTP API client.
//!
//! # Responsibilities
//! - Catalog and health queries for registry rebuilds
//! - KV reads and session lookups for leader resolution
//! - Session-backed locks (create, acquire, renew, release, destroy)
//! - Blocking queries (`index` + `wait`) for change subscriptions
//!
//! # Design Decisions
//! - One session per lock acquisition; it is destroyed on release
//! - The session is renewed every TTL/2 from creation on, including while a
//!   candidate waits for another holder to let go
//! - A refused acquire on a free key means the lock delay is running; only
//!   then does the candidate pause before retrying
//! - Once held, a monitor task keeps renewing and watches the lock key;
//!   either failing marks the lock as lost
//! - 404 on KV reads means "absent", not an error

use std::collections::BTreeMap;
use std::time::Duration;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;
use url::Url;

use crate::config::schema::CoordinationConfig;
use crate::coordination::types::{
    CoordinationError, CoordinationResult, KeyEntry, LockHandle, ServiceInstance, SessionInfo,
    SessionOptions, WatchEvent, WatchSpec,
};
use crate::coordination::CoordinationClient;
use crate::lifecycle::cancelled;

const INDEX_HEADER: &str = "X-Consul-Index";
const TOKEN_HEADER: &str = "X-Consul-Token";
/// Floor for the pause after an acquire refused inside the lock delay window.
const MIN_LOCK_RETRY: Duration = Duration::from_millis(100);
/// Pause after a failed blocking query inside the session monitor.
const MONITOR_RETRY: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthEntry {
    service: AgentService,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AgentService {
    #[serde(rename = "ID")]
    id: String,
    service: String,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    address: String,
    port: u16,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KvPair {
    key: String,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    session: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SessionEntry {
    #[serde(rename = "ID")]
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct SessionCreated {
    #[serde(rename = "ID")]
    id: String,
}

impl From<AgentService> for ServiceInstance {
    fn from(s: AgentService) -> Self {
        Self {
            id: s.id,
            service: s.service,
            address: s.address,
            port: s.port,
            tags: s.tags.unwrap_or_default(),
        }
    }
}

impl KvPair {
    fn into_entry(self) -> CoordinationResult<KeyEntry> {
        let value = match self.value {
            Some(encoded) => Some(
                STANDARD
                    .decode(encoded.as_bytes())
                    .map_err(|e| CoordinationError::Decode(format!("key {}: {}", self.key, e)))?,
            ),
            None => None,
        };
        Ok(KeyEntry {
            key: self.key,
            value,
            session: self.session.filter(|s| !s.is_empty()),
        })
    }
}

/// Coordination client backed by a Consul agent.
#[derive(Debug, Clone)]
pub struct ConsulClient {
    http: reqwest::Client,
    base: Url,
    token: Option<String>,
    datacenter: Option<String>,
    /// Maximum duration of a blocking query.
    wait: Duration,
}

impl ConsulClient {
    /// Build a client from configuration. No request is made.
    pub fn new(config: &CoordinationConfig) -> CoordinationResult<Self> {
        let mut base = Url::parse(&config.address).map_err(|e| {
            CoordinationError::Config(format!("invalid address '{}': {}", config.address, e))
        })?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| CoordinationError::Config(e.to_string()))?;

        tracing::info!(address = %base, datacenter = ?config.datacenter, "Consul client configured");

        Ok(Self {
            http,
            base,
            token: config.token.clone(),
            datacenter: config.datacenter.clone(),
            wait: Duration::from_secs(config.wait_secs),
        })
    }

    fn request(&self, method: Method, path: &str) -> CoordinationResult<RequestBuilder> {
        let url = self
            .base
            .join(path)
            .map_err(|e| CoordinationError::Config(format!("invalid path '{}': {}", path, e)))?;
        let mut req = self.http.request(method, url);
        if let Some(token) = &self.token {
            req = req.header(TOKEN_HEADER, token);
        }
        if let Some(dc) = &self.datacenter {
            req = req.query(&[("dc", dc)]);
        }
        Ok(req)
    }

    fn blocking(&self, req: RequestBuilder, index: u64) -> RequestBuilder {
        req.query(&[
            ("index", index.to_string()),
            ("wait", format!("{}s", self.wait.as_secs())),
        ])
    }

    /// Send a request. `Ok(None)` on 404.
    async fn send(&self, req: RequestBuilder, path: &str) -> CoordinationResult<Option<Response>> {
        let resp = req.send().await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => Ok(Some(resp)),
            s => Err(CoordinationError::Status {
                status: s.as_u16(),
                path: path.to_string(),
            }),
        }
    }

    async fn send_required(&self, req: RequestBuilder, path: &str) -> CoordinationResult<Response> {
        self.send(req, path).await?.ok_or_else(|| CoordinationError::Status {
            status: StatusCode::NOT_FOUND.as_u16(),
            path: path.to_string(),
        })
    }

    async fn read_key(&self, key: &str, index: Option<u64>) -> CoordinationResult<(Option<KeyEntry>, u64)> {
        let path = format!("v1/kv/{}", key);
        let mut req = self.request(Method::GET, &path)?;
        if let Some(index) = index {
            req = self.blocking(req, index);
        }
        let Some(resp) = self.send(req, &path).await? else {
            return Ok((None, 0));
        };
        let new_index = consul_index(&resp);
        let pairs: Vec<KvPair> = resp.json().await?;
        let entry = match pairs.into_iter().next() {
            Some(pair) => Some(pair.into_entry()?),
            None => None,
        };
        Ok((entry, new_index))
    }

    async fn create_session(&self, options: &SessionOptions) -> CoordinationResult<String> {
        let path = "v1/session/create";
        let body = json!({
            "Name": options.name,
            "TTL": format!("{}s", options.ttl.as_secs()),
            "LockDelay": format!("{}s", options.lock_delay.as_secs()),
            "Behavior": "release",
        });
        let req = self.request(Method::PUT, path)?.json(&body);
        let created: SessionCreated = self.send_required(req, path).await?.json().await?;
        tracing::debug!(session = %created.id, name = %options.name, "Session created");
        Ok(created.id)
    }

    /// Renew a session. `Ok(false)` when the session no longer exists.
    async fn renew_session(&self, session_id: &str) -> CoordinationResult<bool> {
        let path = format!("v1/session/renew/{}", session_id);
        let req = self.request(Method::PUT, &path)?;
        Ok(self.send(req, &path).await?.is_some())
    }

    async fn destroy_session(&self, session_id: &str) -> CoordinationResult<()> {
        let path = format!("v1/session/destroy/{}", session_id);
        let req = self.request(Method::PUT, &path)?;
        self.send(req, &path).await?;
        Ok(())
    }

    async fn kv_lock_op(&self, key: &str, op: &str, session_id: &str, body: Vec<u8>) -> CoordinationResult<bool> {
        let path = format!("v1/kv/{}", key);
        let req = self
            .request(Method::PUT, &path)?
            .query(&[(op, session_id)])
            .body(body);
        Ok(self.send_required(req, &path).await?.json().await?)
    }

    async fn discard_session(&self, session_id: &str) {
        if let Err(e) = self.destroy_session(session_id).await {
            tracing::warn!(session = %session_id, error = %e, "Failed to destroy abandoned session");
        }
    }

    /// Block until `key` has no holder, starting from `index`. `Ok(false)` if
    /// cancelled first.
    async fn wait_for_release(
        &self,
        key: &str,
        mut index: u64,
        cancel: &mut watch::Receiver<bool>,
    ) -> CoordinationResult<bool> {
        loop {
            let (entry, new_index) = tokio::select! {
                res = self.read_key(key, Some(index)) => res?,
                _ = cancelled(cancel) => return Ok(false),
            };
            if entry.map_or(true, |e| e.session.is_none()) {
                return Ok(true);
            }
            index = if new_index < index { 0 } else { new_index };
        }
    }

    /// Try to take `key` with `session_id` until it succeeds or `cancel` is
    /// set. Does not renew the session.
    async fn contend(
        &self,
        key: &str,
        session_id: &str,
        options: &SessionOptions,
        cancel: &mut watch::Receiver<bool>,
    ) -> CoordinationResult<bool> {
        let retry = options.lock_delay.max(MIN_LOCK_RETRY);
        loop {
            if *cancel.borrow() {
                return Ok(false);
            }
            if self
                .kv_lock_op(key, "acquire", session_id, options.name.clone().into_bytes())
                .await?
            {
                return Ok(true);
            }

            let (entry, index) = self.read_key(key, None).await?;
            if entry.is_some_and(|e| e.session.is_some()) {
                tracing::debug!(key, "Lock held elsewhere, waiting for release");
                if !self.wait_for_release(key, index, cancel).await? {
                    return Ok(false);
                }
            } else {
                // Free but refused: the previous holder's lock delay is running.
                tracing::debug!(key, retry_ms = retry.as_millis() as u64, "Lock delay in effect");
                tokio::select! {
                    _ = tokio::time::sleep(retry) => {}
                    _ = cancelled(cancel) => return Ok(false),
                }
            }
        }
    }

    /// Renew `session_id` every TTL/2. Returns once the backend no longer
    /// knows the session, or renewals have failed for a whole TTL.
    async fn renew_until_lost(&self, session_id: &str, ttl: Duration) {
        let period = (ttl / 2).max(Duration::from_secs(1));
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        let mut failing_since: Option<tokio::time::Instant> = None;
        loop {
            ticker.tick().await;
            match self.renew_session(session_id).await {
                Ok(true) => failing_since = None,
                Ok(false) => {
                    tracing::warn!(session = %session_id, "Session invalidated by backend");
                    return;
                }
                Err(e) => {
                    let since = *failing_since.get_or_insert_with(tokio::time::Instant::now);
                    tracing::warn!(session = %session_id, error = %e, "Session renewal failed");
                    if since.elapsed() >= ttl {
                        return;
                    }
                }
            }
        }
    }

    /// Returns once `key` is no longer held by `session_id`.
    async fn watch_holder(&self, key: &str, session_id: &str) {
        let mut index = 0;
        loop {
            match self.read_key(key, Some(index)).await {
                Ok((entry, new_index)) => {
                    let holder = entry.and_then(|e| e.session);
                    if holder.as_deref() != Some(session_id) {
                        tracing::warn!(key = %key, holder = ?holder, "Lock key no longer held by our session");
                        return;
                    }
                    index = new_index;
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Lock monitor query failed");
                    tokio::time::sleep(MONITOR_RETRY).await;
                }
            }
        }
    }

    /// Keep the session alive and report loss of the lock.
    async fn monitor_lock(self, key: String, session_id: String, ttl: Duration, lost: watch::Sender<bool>) {
        tokio::select! {
            _ = self.renew_until_lost(&session_id, ttl) => {}
            _ = self.watch_holder(&key, &session_id) => {}
        }
        lost.send_replace(true);
    }
}

fn consul_index(resp: &Response) -> u64 {
    resp.headers()
        .get(INDEX_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

#[async_trait]
impl CoordinationClient for ConsulClient {
    async fn list_services(&self) -> CoordinationResult<BTreeMap<String, Vec<String>>> {
        let path = "v1/catalog/services";
        let req = self.request(Method::GET, path)?;
        let services: BTreeMap<String, Option<Vec<String>>> =
            self.send_required(req, path).await?.json().await?;
        Ok(services
            .into_iter()
            .map(|(name, tags)| (name, tags.unwrap_or_default()))
            .collect())
    }

    async fn healthy_instances(&self, service: &str) -> CoordinationResult<Vec<ServiceInstance>> {
        let path = format!("v1/health/service/{}", service);
        let req = self.request(Method::GET, &path)?.query(&[("passing", "true")]);
        let Some(resp) = self.send(req, &path).await? else {
            return Ok(Vec::new());
        };
        let entries: Vec<HealthEntry> = resp.json().await?;
        Ok(entries.into_iter().map(|e| e.service.into()).collect())
    }

    async fn get_key(&self, key: &str) -> CoordinationResult<Option<KeyEntry>> {
        Ok(self.read_key(key, None).await?.0)
    }

    async fn session_info(&self, session_id: &str) -> CoordinationResult<Option<SessionInfo>> {
        let path = format!("v1/session/info/{}", session_id);
        let req = self.request(Method::GET, &path)?;
        let resp = self.send(req, &path).await.map_err(|e| CoordinationError::Session {
            id: session_id.to_string(),
            reason: e.to_string(),
        })?;
        let Some(resp) = resp else {
            return Ok(None);
        };
        let entries: Option<Vec<SessionEntry>> = resp.json().await.map_err(|e| CoordinationError::Session {
            id: session_id.to_string(),
            reason: e.to_string(),
        })?;
        Ok(entries
            .unwrap_or_default()
            .into_iter()
            .next()
            .map(|s| SessionInfo { id: s.id, name: s.name }))
    }

    async fn acquire_lock(
        &self,
        key: &str,
        options: &SessionOptions,
        mut cancel: watch::Receiver<bool>,
    ) -> CoordinationResult<Option<LockHandle>> {
        let session_id = self.create_session(options).await?;

        let outcome = tokio::select! {
            res = self.contend(key, &session_id, options, &mut cancel) => res,
            _ = self.renew_until_lost(&session_id, options.ttl) => {
                Err(CoordinationError::SessionExpired(session_id.clone()))
            }
        };

        match outcome {
            Ok(true) => {}
            Ok(false) => {
                self.discard_session(&session_id).await;
                return Ok(None);
            }
            Err(e) => {
                self.discard_session(&session_id).await;
                return Err(e);
            }
        }

        let (lost_tx, lost_rx) = watch::channel(false);
        let monitor = tokio::spawn(self.clone().monitor_lock(
            key.to_string(),
            session_id.clone(),
            options.ttl,
            lost_tx,
        ));
        Ok(Some(LockHandle::new(key, session_id, lost_rx).with_monitor(monitor)))
    }

    async fn release_lock(&self, mut lock: LockHandle) -> CoordinationResult<()> {
        lock.stop_monitor();
        let released = self
            .kv_lock_op(&lock.key, "release", &lock.session_id, Vec::new())
            .await;
        let destroyed = self.destroy_session(&lock.session_id).await;
        released?;
        destroyed
    }

    async fn wait_for_change(&self, spec: &WatchSpec, index: u64) -> CoordinationResult<WatchEvent> {
        let (path, recurse) = match spec {
            WatchSpec::Catalog => ("v1/catalog/services".to_string(), false),
            WatchSpec::KeyPrefix(prefix) => (format!("v1/kv/{}", prefix), true),
        };
        let mut req = self.blocking(self.request(Method::GET, &path)?, index);
        if recurse {
            req = req.query(&[("recurse", "true")]);
        }
        let resp = req.send().await?;
        let new_index = consul_index(&resp);
        let payload = match resp.status() {
            StatusCode::NOT_FOUND => json!([]),
            s if s.is_success() => resp.json().await?,
            s => {
                return Err(CoordinationError::Status {
                    status: s.as_u16(),
                    path,
                })
            }
        };
        Ok(WatchEvent {
            index: new_index,
            payload,
        })
    }
}
