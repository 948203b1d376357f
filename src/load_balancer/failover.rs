//! Connection establishment with endpoint failover.
//!
//! # Responsibilities
//! - Resolve the service named by the request authority
//! - Dial a randomly chosen endpoint, falling back to the others on refusal
//! - Plug into the pooled HTTP client as its connector
//!
//! # Design Decisions
//! - Each request works on its own copy of the endpoint list
//! - Every distinct endpoint is tried at most once per dial

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::http::Uri;
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::net::TcpStream;
use tower::Service;

use crate::load_balancer::{LoadBalancer, RandomSelector};
use crate::registry::{Endpoint, Registry};

/// Why no upstream connection could be made.
#[derive(Debug, Error)]
pub enum DialError {
    #[error("request does not name a service")]
    MissingService,

    #[error("no endpoints registered for service '{0}'")]
    NoEndpoints(String),

    #[error("all {attempts} endpoints of '{service}' failed, last error: {last_error}")]
    Exhausted {
        service: String,
        attempts: usize,
        last_error: io::Error,
    },
}

/// Dial one of `candidates`, removing each failed endpoint before picking again.
///
/// Makes at most `candidates.len()` attempts. Returns the connection together
/// with the endpoint it reached.
pub async fn dial_with_failover<T, F, Fut>(
    service: &str,
    mut candidates: Vec<Endpoint>,
    balancer: &dyn LoadBalancer,
    mut dial: F,
) -> Result<(T, Endpoint), DialError>
where
    F: FnMut(Endpoint) -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    let attempts = candidates.len();
    let mut last_error = None;

    while let Some(index) = balancer.next_index(&candidates) {
        let endpoint = candidates.swap_remove(index);
        match dial(endpoint.clone()).await {
            Ok(conn) => return Ok((conn, endpoint)),
            Err(e) => {
                tracing::warn!(
                    service,
                    endpoint = %endpoint,
                    remaining = candidates.len(),
                    error = %e,
                    "Dial failed, trying next endpoint"
                );
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(last_error) => Err(DialError::Exhausted {
            service: service.to_string(),
            attempts,
            last_error,
        }),
        None => Err(DialError::NoEndpoints(service.to_string())),
    }
}

/// Open a TCP connection to `endpoint` within `timeout`.
pub async fn connect(endpoint: Endpoint, timeout: Duration) -> io::Result<TcpStream> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect((endpoint.host(), endpoint.port())))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, format!("connect to {endpoint} timed out")))??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Connector for the pooled client: the URI host is a service name, not an
/// address, and is resolved through the registry on every new connection.
#[derive(Clone)]
pub struct FailoverConnector {
    registry: Arc<Registry>,
    balancer: Arc<dyn LoadBalancer>,
    connect_timeout: Duration,
}

impl FailoverConnector {
    pub fn new(registry: Arc<Registry>, connect_timeout: Duration) -> Self {
        Self {
            registry,
            balancer: Arc::new(RandomSelector::new()),
            connect_timeout,
        }
    }
}

impl Service<Uri> for FailoverConnector {
    type Response = TokioIo<TcpStream>;
    type Error = DialError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let registry = self.registry.clone();
        let balancer = self.balancer.clone();
        let timeout = self.connect_timeout;

        Box::pin(async move {
            let service = uri.host().ok_or(DialError::MissingService)?;
            let candidates = registry
                .lookup(service)
                .ok_or_else(|| DialError::NoEndpoints(service.to_string()))?;

            let (stream, endpoint) =
                dial_with_failover(service, candidates, balancer.as_ref(), |ep| connect(ep, timeout))
                    .await?;
            tracing::debug!(service, endpoint = %endpoint, "Upstream connection established");
            Ok(TokioIo::new(stream))
        })
    }
}
