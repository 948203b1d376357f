//! mesh-proxy binary.
//!
//! Runs either the reverse proxy (`--role proxy`) or a member process that
//! takes part in the leader election for its role.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use mesh_proxy::config::{read_config, validate_config, ProxyConfig};
use mesh_proxy::coordination::ConsulClient;
use mesh_proxy::lifecycle;
use mesh_proxy::observability::{logging, metrics};

#[derive(Parser, Debug)]
#[command(name = "mesh-proxy", version, about = "Service mesh proxy and leader election member")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP port, overrides listener.bind_address
    #[arg(long)]
    port: Option<u16>,

    /// Environment: DEBUG, DEV, STG, PROD
    #[arg(long)]
    env: Option<String>,

    /// Role: proxy, or the member role to elect a leader for
    #[arg(long)]
    role: Option<String>,

    /// Consul agent address
    #[arg(long)]
    consul: Option<String>,
}

impl Args {
    fn apply(&self, config: &mut ProxyConfig) {
        if let Some(port) = self.port {
            config.listener.bind_address = format!("0.0.0.0:{port}");
        }
        if let Some(env) = &self.env {
            config.env = env.clone();
        }
        if let Some(role) = &self.role {
            config.role = role.clone();
        }
        if let Some(consul) = &self.consul {
            config.coordination.address = consul.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => read_config(path)?,
        None => ProxyConfig::default(),
    };
    args.apply(&mut config);
    if let Err(errors) = validate_config(&config) {
        for error in &errors {
            eprintln!("config error: {error}");
        }
        return Err(format!("{} configuration error(s)", errors.len()).into());
    }

    logging::init_logging(&config.observability.log_level);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        role = %config.role,
        env = %config.env,
        "mesh-proxy starting"
    );

    if config.observability.metrics_enabled {
        let addr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let client = ConsulClient::new(&config.coordination)?;
    tracing::info!(address = %config.coordination.address, "Coordination client ready");

    lifecycle::run(config, Arc::new(client)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides() {
        let args = Args::parse_from([
            "mesh-proxy",
            "--port",
            "8081",
            "--role",
            "checkout",
            "--consul",
            "http://consul:8500",
        ]);
        let mut config = ProxyConfig::default();
        args.apply(&mut config);

        assert_eq!(config.listener.bind_address, "0.0.0.0:8081");
        assert_eq!(config.role, "checkout");
        assert_eq!(config.env, "DEBUG");
        assert_eq!(config.coordination.address, "http://consul:8500");
        assert!(validate_config(&config).is_ok());
    }
}
