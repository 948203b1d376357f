//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the Axum router for each surface (proxy, member, admin)
//! - Wire up middleware (request ID, tracing, timeout)
//! - Serve a listener until the shutdown broadcast fires

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    response::Response,
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::admin::{setup_admin_router, AdminState};
use crate::config::ProxyConfig;
use crate::election::Election;
use crate::http::dispatcher::Dispatcher;
use crate::http::member::{setup_member_router, MemberState};
use crate::http::request::{propagate_request_id_layer, request_id, set_request_id_layer};

/// One HTTP surface bound to one listener.
pub struct HttpServer {
    name: &'static str,
    router: Router,
}

impl HttpServer {
    /// Wildcard reverse proxy surface.
    pub fn proxy(dispatcher: Arc<Dispatcher>, config: &ProxyConfig) -> Self {
        let router = Router::new()
            .route("/", any(proxy_handler))
            .route("/{*path}", any(proxy_handler))
            .with_state(dispatcher);
        Self::new("proxy", router, config)
    }

    /// Status API of a member process.
    pub fn member(election: Arc<Election>, hostname: String, config: &ProxyConfig) -> Self {
        let state = MemberState {
            election,
            hostname,
            role: config.role.clone(),
        };
        Self::new("member", setup_member_router(state), config)
    }

    /// Admin surface of the proxy process.
    pub fn admin(state: AdminState, config: &ProxyConfig) -> Self {
        Self::new("admin", setup_admin_router(state), config)
    }

    fn new(name: &'static str, router: Router, config: &ProxyConfig) -> Self {
        Self {
            name,
            router: Self::with_layers(router, config),
        }
    }

    /// Wrap a router with the shared middleware stack.
    #[allow(deprecated)]
    fn with_layers(router: Router, config: &ProxyConfig) -> Router {
        router
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
                tracing::info_span!(
                    "request",
                    method = %req.method(),
                    uri = %req.uri(),
                    request_id = %request_id(req.headers()),
                )
            }))
            .layer(set_request_id_layer())
    }

    /// The router with all layers applied.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve `listener` until `shutdown` fires, then drain in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(server = self.name, address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!(server = self.name, "HTTP server stopped");
        Ok(())
    }
}

async fn proxy_handler(State(dispatcher): State<Arc<Dispatcher>>, request: Request<Body>) -> Response {
    dispatcher.handle(request).await
}
