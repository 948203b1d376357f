//! Registry rebuild from the coordination catalog.
//!
//! # Responsibilities
//! - List services and their passing instances
//! - Resolve leader-tagged instances to the role they lead
//! - Swap the rebuilt mapping in as a single snapshot
//!
//! # Leader Tags
//! An instance tagged exactly `["le", <role>]` takes part in the election
//! for `<role>`. It is published under `<role>` (never under its own
//! service name) when the session holding `<key_prefix><role>` was
//! registered with that instance's service name. The first matching
//! instance wins.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::coordination::{CoordinationClient, CoordinationError, ServiceInstance};
use crate::observability::metrics;
use crate::registry::snapshot::{Snapshot, SnapshotHolder};
use crate::registry::Endpoint;
use crate::watcher::WatchHandler;

/// First tag of an instance taking part in a leader election.
pub const LEADER_TAG: &str = "le";

/// Why a refresh cycle was abandoned.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("listing services failed: {0}")]
    Catalog(#[source] CoordinationError),

    #[error("health query for '{service}' failed: {source}")]
    Health {
        service: String,
        #[source]
        source: CoordinationError,
    },

    #[error("reading election key '{key}' failed: {source}")]
    ElectionKey {
        key: String,
        #[source]
        source: CoordinationError,
    },

    #[error("session lookup for '{key}' failed: {source}")]
    Session {
        key: String,
        #[source]
        source: CoordinationError,
    },
}

#[derive(Debug, PartialEq, Eq)]
enum Tagging<'a> {
    Plain,
    Leader(&'a str),
    Malformed,
}

fn classify(tags: &[String]) -> Tagging<'_> {
    match tags {
        [marker, role] if marker == LEADER_TAG && !role.is_empty() => Tagging::Leader(role),
        [marker, ..] if marker == LEADER_TAG => Tagging::Malformed,
        _ => Tagging::Plain,
    }
}

/// Service name to endpoints, kept in sync with the coordination backend.
pub struct Registry {
    holder: SnapshotHolder,
    client: Arc<dyn CoordinationClient>,
}

impl Registry {
    /// Create an empty registry backed by `client`.
    pub fn new(client: Arc<dyn CoordinationClient>) -> Self {
        Self {
            holder: SnapshotHolder::new(),
            client,
        }
    }

    /// Endpoints currently published for `name`.
    ///
    /// Returns an owned copy; `None` when the name is unknown or has no
    /// endpoints.
    pub fn lookup(&self, name: &str) -> Option<Vec<Endpoint>> {
        self.holder
            .snapshot()
            .get(name)
            .filter(|endpoints| !endpoints.is_empty())
            .cloned()
    }

    /// The whole current mapping.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.holder.snapshot()
    }

    /// Rebuild the mapping from scratch and publish it.
    ///
    /// On error the previous snapshot stays in place.
    pub async fn refresh(&self, election_prefix: &str) -> Result<(), RegistryError> {
        match self.build_snapshot(election_prefix).await {
            Ok(next) => {
                let services = next.len();
                self.holder.replace(next);
                metrics::record_registry_refresh(services);
                tracing::debug!(services, "Registry refreshed");
                Ok(())
            }
            Err(e) => {
                metrics::record_registry_refresh_failure();
                Err(e)
            }
        }
    }

    async fn build_snapshot(&self, election_prefix: &str) -> Result<Snapshot, RegistryError> {
        let services = self
            .client
            .list_services()
            .await
            .map_err(RegistryError::Catalog)?;

        let mut next = Snapshot::new();
        // role -> session name holding its election key, per cycle
        let mut leaders: HashMap<String, Option<String>> = HashMap::new();

        for service in services.keys() {
            let instances = self
                .client
                .healthy_instances(service)
                .await
                .map_err(|source| RegistryError::Health {
                    service: service.clone(),
                    source,
                })?;

            for instance in &instances {
                let Some(endpoint) = Endpoint::from_instance(instance) else {
                    tracing::debug!(service = %service, id = %instance.id, "Skipping instance without address");
                    continue;
                };

                match classify(&instance.tags) {
                    Tagging::Plain => next.entry(service.clone()).or_default().push(endpoint),
                    Tagging::Malformed => {
                        tracing::warn!(
                            service = %service,
                            id = %instance.id,
                            tags = ?instance.tags,
                            "Leader tag must be exactly [\"le\", <role>], skipping instance"
                        );
                    }
                    Tagging::Leader(role) => {
                        if next.contains_key(role) {
                            continue;
                        }
                        let leader = match leaders.get(role) {
                            Some(leader) => leader.clone(),
                            None => {
                                let leader = self.leader_of(election_prefix, role).await?;
                                leaders.insert(role.to_string(), leader.clone());
                                leader
                            }
                        };
                        if leader.as_deref() == Some(instance.service.as_str()) {
                            next.insert(role.to_string(), vec![endpoint]);
                        }
                    }
                }
            }
        }

        Ok(next)
    }

    /// Session name of the current holder of the election key for `role`.
    async fn leader_of(&self, prefix: &str, role: &str) -> Result<Option<String>, RegistryError> {
        let key = format!("{prefix}{role}");
        let entry = self
            .client
            .get_key(&key)
            .await
            .map_err(|source| RegistryError::ElectionKey {
                key: key.clone(),
                source,
            })?;

        let Some(session) = entry.and_then(|e| e.session) else {
            return Ok(None);
        };

        let info = self
            .client
            .session_info(&session)
            .await
            .map_err(|source| RegistryError::Session { key, source })?;
        Ok(info.map(|i| i.name))
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("services", &self.holder.snapshot().len())
            .finish()
    }
}

/// Watch handler that rebuilds the registry on every notification.
pub struct RegistryRefresher {
    registry: Arc<Registry>,
    election_prefix: String,
}

impl RegistryRefresher {
    pub fn new(registry: Arc<Registry>, election_prefix: impl Into<String>) -> Self {
        Self {
            registry,
            election_prefix: election_prefix.into(),
        }
    }
}

#[async_trait]
impl WatchHandler for RegistryRefresher {
    async fn handle(&self, index: u64, _payload: &serde_json::Value) {
        if let Err(e) = self.registry.refresh(&self.election_prefix).await {
            tracing::warn!(index, error = %e, "Registry refresh failed, keeping previous snapshot");
        }
    }
}

/// Helper for building instances in tests across modules.
#[cfg(test)]
pub(crate) fn instance(service: &str, id: &str, address: &str, port: u16, tags: &[&str]) -> ServiceInstance {
    ServiceInstance {
        id: id.to_string(),
        service: service.to_string(),
        address: address.to_string(),
        port,
        tags: tags.iter().map(|t| t.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::MemoryCoordinator;

    const PREFIX: &str = "xmicro/election/";

    fn setup() -> (Arc<MemoryCoordinator>, Registry) {
        let backend = Arc::new(MemoryCoordinator::new());
        let registry = Registry::new(backend.clone());
        (backend, registry)
    }

    #[test]
    fn test_classify_tags() {
        let tags = |t: &[&str]| t.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(classify(&tags(&[])), Tagging::Plain);
        assert_eq!(classify(&tags(&["v1", "le"])), Tagging::Plain);
        assert_eq!(classify(&tags(&["le", "checkout"])), Tagging::Leader("checkout"));
        assert_eq!(classify(&tags(&["le"])), Tagging::Malformed);
        assert_eq!(classify(&tags(&["le", "checkout", "x"])), Tagging::Malformed);
        assert_eq!(classify(&tags(&["le", ""])), Tagging::Malformed);
    }

    #[tokio::test]
    async fn test_plain_services_and_unknown_lookup() {
        let (backend, registry) = setup();
        backend.register(instance("web", "web-1", "10.0.0.1", 80, &[]));
        backend.register(instance("web", "web-2", "10.0.0.2", 80, &["v2"]));
        registry.refresh(PREFIX).await.unwrap();

        let endpoints = registry.lookup("web").unwrap();
        assert_eq!(endpoints.len(), 2);
        assert!(endpoints.contains(&Endpoint::new("10.0.0.2", 80)));
        assert_eq!(registry.lookup("nope"), None);
    }

    #[tokio::test]
    async fn test_unhealthy_and_addressless_instances_skipped() {
        let (backend, registry) = setup();
        backend.register(instance("web", "web-1", "", 80, &[]));
        backend.register_with_health(instance("web", "web-2", "10.0.0.2", 80, &[]), false);
        backend.register(instance("api", "api-1", "10.0.1.1", 9000, &[]));
        registry.refresh(PREFIX).await.unwrap();

        assert_eq!(registry.lookup("web"), None);
        assert!(!registry.snapshot().contains_key("web"));
        assert_eq!(registry.lookup("api").unwrap(), vec![Endpoint::new("10.0.1.1", 9000)]);
    }

    #[tokio::test]
    async fn test_leader_tag_resolution() {
        let (backend, registry) = setup();
        backend.register(instance("checkout-v1", "c1", "10.0.0.1", 8080, &["le", "checkout"]));
        backend.register(instance("checkout-v2", "c2", "10.0.0.2", 8080, &["le", "checkout"]));
        backend.hold_lock("xmicro/election/checkout", "checkout-v2").unwrap();
        registry.refresh(PREFIX).await.unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot["checkout"], vec![Endpoint::new("10.0.0.2", 8080)]);
        assert!(!snapshot.contains_key("checkout-v2"));
        assert!(!snapshot.contains_key("checkout-v1"));
    }

    #[tokio::test]
    async fn test_first_leader_instance_wins() {
        let (backend, registry) = setup();
        backend.register(instance("checkout-v2", "c2a", "10.0.0.2", 8080, &["le", "checkout"]));
        backend.register(instance("checkout-v2", "c2b", "10.0.0.3", 8080, &["le", "checkout"]));
        backend.hold_lock("xmicro/election/checkout", "checkout-v2").unwrap();
        registry.refresh(PREFIX).await.unwrap();

        assert_eq!(registry.lookup("checkout").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unheld_election_publishes_nothing() {
        let (backend, registry) = setup();
        backend.register(instance("checkout-v2", "c2", "10.0.0.2", 8080, &["le", "checkout"]));
        backend.put_key("xmicro/election/checkout", b"");
        registry.refresh(PREFIX).await.unwrap();

        assert!(registry.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_leader_tags_skipped() {
        let (backend, registry) = setup();
        backend.register(instance("checkout-v2", "c2", "10.0.0.2", 8080, &["le", "checkout", "extra"]));
        backend.hold_lock("xmicro/election/checkout", "checkout-v2").unwrap();
        registry.refresh(PREFIX).await.unwrap();

        assert!(registry.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_snapshot() {
        let (backend, registry) = setup();
        backend.register(instance("web", "web-1", "10.0.0.1", 80, &[]));
        backend.register(instance("checkout-v2", "c2", "10.0.0.2", 8080, &["le", "checkout"]));
        backend.hold_lock("xmicro/election/checkout", "checkout-v2").unwrap();
        registry.refresh(PREFIX).await.unwrap();
        let before = registry.snapshot();

        backend.register(instance("web", "web-2", "10.0.0.9", 80, &[]));
        backend.fail_session_lookups(true);
        let err = registry.refresh(PREFIX).await.unwrap_err();
        assert!(matches!(err, RegistryError::Session { .. }));

        assert_eq!(*registry.snapshot(), *before);
        assert_eq!(registry.lookup("web").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_refresher_handles_notification() {
        let (backend, registry) = setup();
        let registry = Arc::new(registry);
        let refresher = RegistryRefresher::new(registry.clone(), PREFIX);
        backend.register(instance("web", "web-1", "10.0.0.1", 80, &[]));

        refresher.handle(7, &serde_json::Value::Null).await;
        assert!(registry.lookup("web").is_some());

        backend.fail_session_lookups(true);
        refresher.handle(8, &serde_json::Value::Null).await;
        assert!(registry.lookup("web").is_some());
    }
}
