//! Request dispatch to registered services.
//!
//! # Responsibilities
//! - Own the registry and the two watch subscriptions feeding it
//! - Turn `/<service>/<rest>` into an upstream request and forward it
//! - Map every failure to a distinct status code
//!
//! # Modes
//! - Pooled: one connection pool per service; the pool's connector picks an
//!   endpoint and fails over between endpoints on refusal. A pool is dropped
//!   as soon as the registry publishes a different endpoint set for its
//!   service, so idle connections never outlive the endpoint they reach.
//! - Direct: an endpoint is picked per request and dialled without failover

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, Response, Uri};
use axum::response::IntoResponse;
use hyper::body::Incoming;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::{Builder, Client, ResponseFuture};
use hyper_util::rt::TokioExecutor;

use crate::config::{DispatchConfig, DispatchMode, ProxyConfig};
use crate::coordination::{CoordinationClient, WatchSpec};
use crate::http::request::{prepare_upstream, request_id};
use crate::http::response::{from_upstream, ProxyError};
use crate::lifecycle::Stoppable;
use crate::load_balancer::{FailoverConnector, LoadBalancer, RandomSelector};
use crate::observability::metrics;
use crate::registry::{Endpoint, Registry, RegistryRefresher};
use crate::routing::ServiceTarget;
use crate::watcher::Watcher;

/// Pooled client of one service, valid for the endpoint set it was built for.
struct ServicePool {
    endpoints: Vec<Endpoint>,
    client: Client<FailoverConnector, Body>,
}

struct PooledUpstream {
    builder: Builder,
    connector: FailoverConnector,
    pools: Mutex<HashMap<String, ServicePool>>,
}

impl PooledUpstream {
    /// Client for `service`, rebuilt when `endpoints` differs from the set the
    /// current pool was built for. Dropping the old client closes its idle
    /// connections; in-flight requests finish on theirs.
    fn client(&self, service: &str, endpoints: &[Endpoint]) -> Client<FailoverConnector, Body> {
        let mut pools = self.pools.lock().expect("dispatcher pool mutex poisoned");
        if let Some(pool) = pools.get(service) {
            if pool.endpoints == endpoints {
                return pool.client.clone();
            }
            tracing::debug!(service, "Endpoint set changed, dropping pooled connections");
        }

        let client = self.builder.build(self.connector.clone());
        pools.insert(
            service.to_string(),
            ServicePool {
                endpoints: endpoints.to_vec(),
                client: client.clone(),
            },
        );
        client
    }

    #[cfg(test)]
    fn pool_count(&self) -> usize {
        self.pools.lock().unwrap().len()
    }
}

enum Upstream {
    Pooled(PooledUpstream),
    Direct(Client<HttpConnector, Body>),
}

fn client_builder(config: &DispatchConfig) -> Builder {
    let idle = if config.disable_keep_alives {
        0
    } else {
        config.max_idle_conns_per_host
    };
    let mut builder = Client::builder(TokioExecutor::new());
    builder
        .pool_max_idle_per_host(idle)
        .pool_idle_timeout(Duration::from_secs(config.pool_idle_timeout_secs));
    builder
}

/// Metrics label for a round trip. Client-chosen names that never resolved
/// share one label so they cannot grow the series set.
fn metric_label<'a>(service: &'a str, outcome: &Result<Response<Body>, ProxyError>) -> &'a str {
    match outcome {
        Err(ProxyError::ServiceNotFound(_)) => metrics::UNKNOWN_SERVICE,
        _ => service,
    }
}

/// Reverse proxy entry point.
pub struct Dispatcher {
    registry: Arc<Registry>,
    watcher: Watcher,
    upstream: Upstream,
    selector: RandomSelector,
    response_header_timeout: Duration,
}

impl Dispatcher {
    /// Build the registry, subscribe it to catalog and election changes, and
    /// set up the upstream client. Must run inside a Tokio runtime.
    pub fn start(config: &ProxyConfig, client: Arc<dyn CoordinationClient>) -> Self {
        let registry = Arc::new(Registry::new(client.clone()));
        let watcher = Watcher::new(client, config.watch.clone());

        let prefix = config.election.key_prefix.clone();
        let refresher = Arc::new(RegistryRefresher::new(registry.clone(), prefix.clone()));
        watcher.subscribe(WatchSpec::Catalog, refresher.clone());
        watcher.subscribe(WatchSpec::KeyPrefix(prefix), refresher);

        let dispatch = &config.proxy;
        let connect_timeout = Duration::from_millis(dispatch.connect_timeout_ms);
        let upstream = match dispatch.mode {
            DispatchMode::Pooled => Upstream::Pooled(PooledUpstream {
                builder: client_builder(dispatch),
                connector: FailoverConnector::new(registry.clone(), connect_timeout),
                pools: Mutex::new(HashMap::new()),
            }),
            DispatchMode::Direct => {
                let mut connector = HttpConnector::new();
                connector.set_connect_timeout(Some(connect_timeout));
                connector.set_nodelay(true);
                Upstream::Direct(client_builder(dispatch).build(connector))
            }
        };

        tracing::info!(mode = ?dispatch.mode, subscriptions = watcher.active(), "Dispatcher started");
        Self {
            registry,
            watcher,
            upstream,
            selector: RandomSelector::new(),
            response_header_timeout: Duration::from_secs(dispatch.response_header_timeout_secs),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Proxy one request.
    pub async fn handle(&self, request: Request<Body>) -> Response<Body> {
        let start = Instant::now();
        let request_id = request_id(request.headers()).to_string();

        let target = match ServiceTarget::parse(request.uri()) {
            Ok(target) => target,
            Err(e) => {
                tracing::warn!(request_id = %request_id, path = %request.uri().path(), error = %e, "Malformed proxy path");
                return ProxyError::from(e).into_response();
            }
        };

        tracing::debug!(
            request_id = %request_id,
            method = %request.method(),
            service = %target.service,
            path = %target.path_and_query,
            "Proxying request"
        );

        let outcome = self.forward(request, &target).await;
        let label = metric_label(&target.service, &outcome);
        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(request_id = %request_id, service = %target.service, error = %e, "Proxy request failed");
                e.into_response()
            }
        };

        metrics::record_roundtrip(label, response.status().as_u16(), start);
        response
    }

    async fn forward(&self, request: Request<Body>, target: &ServiceTarget) -> Result<Response<Body>, ProxyError> {
        let service = target.service.as_str();
        let endpoints = self
            .registry
            .lookup(service)
            .ok_or_else(|| ProxyError::ServiceNotFound(service.to_string()))?;

        let authority = match &self.upstream {
            Upstream::Pooled(_) => service.to_string(),
            Upstream::Direct(_) => self
                .selector
                .next_server(&endpoints)
                .ok_or_else(|| ProxyError::ServiceNotFound(service.to_string()))?
                .to_string(),
        };
        let uri = Uri::builder()
            .scheme("http")
            .authority(authority)
            .path_and_query(target.path_and_query.clone())
            .build()
            .map_err(|e| ProxyError::Upstream(e.to_string()))?;

        let client_addr = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let (mut parts, body) = request.into_parts();
        prepare_upstream(&mut parts, uri, client_addr);
        let upstream_request = Request::from_parts(parts, body);

        let pending: ResponseFuture = match &self.upstream {
            Upstream::Pooled(pooled) => pooled.client(service, &endpoints).request(upstream_request),
            Upstream::Direct(client) => client.request(upstream_request),
        };
        let response: Response<Incoming> = tokio::time::timeout(self.response_header_timeout, pending)
        .await
        .map_err(|_| ProxyError::Timeout(self.response_header_timeout))?
        .map_err(|e| ProxyError::from_client(service, e))?;

        Ok(from_upstream(response.map(Body::new)))
    }

    /// Cancel both subscriptions and wait for them.
    pub async fn stop(&self) {
        self.watcher.stop_all().await;
    }
}

#[async_trait]
impl Stoppable for Dispatcher {
    fn name(&self) -> &str {
        "dispatcher"
    }

    async fn stop(&self) {
        Dispatcher::stop(self).await;
    }
}
