//! Startup orchestration.
//!
//! # Responsibilities
//! - Bind listeners (any bind failure is fatal)
//! - Start the role subsystem: dispatcher for `proxy`, election otherwise
//! - Serve until the termination signal, then run the shutdown sequence
//!
//! # Shutdown Sequence
//! ```text
//! signal → Shutdown::trigger (servers stop accepting, drain)
//!        → stop_all (election releases its key / watches cancelled)
//!        → await servers
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::admin::AdminState;
use crate::config::ProxyConfig;
use crate::coordination::CoordinationClient;
use crate::election::Election;
use crate::http::{Dispatcher, HttpServer};
use crate::lifecycle::shutdown::{stop_all, Shutdown, Stoppable};
use crate::lifecycle::signals::wait_for_termination;

/// Errors that abort the process.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to bind {name} listener on {address}: {source}")]
    Bind {
        name: &'static str,
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{name} server failed: {source}")]
    Serve {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Host name of this machine, used as the default election identity.
pub fn local_hostname() -> String {
    if let Ok(name) = std::env::var("HOSTNAME") {
        if !name.trim().is_empty() {
            return name.trim().to_string();
        }
    }
    std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

async fn bind(name: &'static str, address: &str) -> Result<TcpListener, StartupError> {
    TcpListener::bind(address)
        .await
        .map_err(|source| StartupError::Bind {
            name,
            address: address.to_string(),
            source,
        })
}

type ServerTask = (&'static str, JoinHandle<Result<(), std::io::Error>>);

fn spawn_server(name: &'static str, server: HttpServer, listener: TcpListener, shutdown: &Shutdown) -> ServerTask {
    (name, tokio::spawn(server.run(listener, shutdown.subscribe())))
}

/// Run the configured role until SIGINT or SIGTERM.
pub async fn run(config: ProxyConfig, client: Arc<dyn CoordinationClient>) -> Result<(), StartupError> {
    run_until(config, client, wait_for_termination()).await
}

/// Run the configured role until `signal` resolves.
pub async fn run_until<F>(
    config: ProxyConfig,
    client: Arc<dyn CoordinationClient>,
    signal: F,
) -> Result<(), StartupError>
where
    F: Future<Output = ()>,
{
    let shutdown = Shutdown::new();
    let listener = bind("main", &config.listener.bind_address).await?;
    tracing::info!(
        role = %config.role,
        env = %config.env,
        address = %config.listener.bind_address,
        "Starting"
    );

    let mut servers = Vec::new();
    let subsystem: Arc<dyn Stoppable> = if config.is_proxy() {
        let admin_listener = if config.admin.enabled {
            Some(bind("admin", &config.admin.bind_address).await?)
        } else {
            None
        };

        let dispatcher = Arc::new(Dispatcher::start(&config, client));
        servers.push(spawn_server(
            "proxy",
            HttpServer::proxy(dispatcher.clone(), &config),
            listener,
            &shutdown,
        ));
        if let Some(admin_listener) = admin_listener {
            let state = AdminState {
                dispatcher: dispatcher.clone(),
                role: config.role.clone(),
                env: config.env.clone(),
                started: Instant::now(),
            };
            servers.push(spawn_server("admin", HttpServer::admin(state, &config), admin_listener, &shutdown));
        }
        dispatcher as Arc<dyn Stoppable>
    } else {
        let hostname = local_hostname();
        let identity = config.election.identity.clone().unwrap_or_else(|| hostname.clone());
        let election = Arc::new(Election::start(
            client,
            identity,
            config.election_key(),
            &config.election,
        ));
        servers.push(spawn_server(
            "member",
            HttpServer::member(election.clone(), hostname, &config),
            listener,
            &shutdown,
        ));
        election as Arc<dyn Stoppable>
    };

    signal.await;

    tracing::info!(listeners = shutdown.receiver_count(), "Stopping listeners");
    shutdown.trigger();
    stop_all(&[subsystem.as_ref()]).await;

    let mut result = Ok(());
    for (name, task) in servers {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(source)) => {
                tracing::error!(server = name, error = %source, "Server failed");
                result = Err(StartupError::Serve { name, source });
            }
            Err(e) => tracing::error!(server = name, error = %e, "Server task panicked"),
        }
    }

    tracing::info!("Shutdown complete");
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_hostname_not_empty() {
        assert!(!local_hostname().is_empty());
    }

    #[tokio::test]
    async fn test_bind_failure_is_fatal() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = ProxyConfig::default();
        config.listener.bind_address = taken.local_addr().unwrap().to_string();

        let client = Arc::new(crate::coordination::MemoryCoordinator::new());
        let err = run_until(config, client, async {}).await.unwrap_err();
        assert!(matches!(err, StartupError::Bind { name: "main", .. }));
    }
}
