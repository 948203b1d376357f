//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{Method, Uri};
use axum::Router;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use mesh_proxy::coordination::{MemoryCoordinator, ServiceInstance};
use mesh_proxy::lifecycle::Shutdown;
use mesh_proxy::{Dispatcher, HttpServer, ProxyConfig};

/// Start a mock backend that answers every request with
/// `"<name> <METHOD> <request-target>"` and returns its address.
pub async fn start_echo_backend(name: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let mut buf = Vec::new();
                        let mut chunk = [0u8; 1024];
                        while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                            match socket.read(&mut chunk).await {
                                Ok(0) | Err(_) => return,
                                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                            }
                        }
                        let head = String::from_utf8_lossy(&buf);
                        let request_line = head.lines().next().unwrap_or_default();
                        let mut parts = request_line.split_whitespace();
                        let method = parts.next().unwrap_or_default();
                        let target = parts.next().unwrap_or_default();
                        let body = format!("{name} {method} {target}");

                        let response = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Like [`start_echo_backend`], but served by hyper with connection reuse.
pub async fn start_keepalive_backend(name: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().fallback(move |method: Method, uri: Uri| async move { format!("{name} {method} {uri}") });
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// Start a backend that accepts connections but never answers.
pub async fn start_silent_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    addr
}

/// An address nothing listens on.
pub async fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn instance(service: &str, id: &str, addr: SocketAddr, tags: &[&str]) -> ServiceInstance {
    ServiceInstance {
        id: id.to_string(),
        service: service.to_string(),
        address: addr.ip().to_string(),
        port: addr.port(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
    }
}

/// A proxy serving on an ephemeral port.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub dispatcher: Arc<Dispatcher>,
    shutdown: Shutdown,
}

impl TestProxy {
    pub async fn start(config: ProxyConfig, backend: Arc<MemoryCoordinator>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let dispatcher = Arc::new(Dispatcher::start(&config, backend));
        let shutdown = Shutdown::new();
        let server = HttpServer::proxy(dispatcher.clone(), &config);
        tokio::spawn(server.run(listener, shutdown.subscribe()));
        Self {
            addr,
            dispatcher,
            shutdown,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Wait until the registry publishes `service`.
    pub async fn wait_for(&self, service: &str) {
        eventually(|| self.dispatcher.registry().lookup(service).is_some()).await;
    }

    pub async fn stop(self) {
        self.shutdown.trigger();
        self.dispatcher.stop().await;
    }
}

/// Poll `cond` until it holds, panicking after a few seconds.
pub async fn eventually(cond: impl Fn() -> bool) {
    for _ in 0..300 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Default config for tests: fast retries, short long-polls.
pub fn test_config() -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.watch.retry_base_ms = 10;
    config.watch.retry_max_ms = 100;
    config.election.retry_delay_ms = 20;
    config.proxy.response_header_timeout_secs = 1;
    config
}

/// Backend with short long-poll waits.
pub fn memory_backend() -> Arc<MemoryCoordinator> {
    Arc::new(MemoryCoordinator::with_wait(Duration::from_millis(200)))
}
