//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy
//! and member processes. All types derive Serde traits for deserialization
//! from config files.

use serde::{Deserialize, Serialize};

/// Role name that runs the dispatcher instead of an election.
pub const PROXY_ROLE: &str = "proxy";

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// `proxy` runs the dispatcher; any other value is a member role that
    /// takes part in the election for that role.
    pub role: String,

    /// Deployment environment label (DEBUG, DEV, STG, PROD).
    pub env: String,

    /// Listener configuration.
    pub listener: ListenerConfig,

    /// Coordination backend connection.
    pub coordination: CoordinationConfig,

    /// Leader election settings.
    pub election: ElectionConfig,

    /// Request forwarding settings.
    pub proxy: DispatchConfig,

    /// Change subscription settings.
    pub watch: WatchConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Admin endpoints (proxy role only).
    pub admin: AdminConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            role: PROXY_ROLE.to_string(),
            env: "DEBUG".to_string(),
            listener: ListenerConfig::default(),
            coordination: CoordinationConfig::default(),
            election: ElectionConfig::default(),
            proxy: DispatchConfig::default(),
            watch: WatchConfig::default(),
            timeouts: TimeoutConfig::default(),
            admin: AdminConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl ProxyConfig {
    /// Returns true when this process runs the dispatcher.
    pub fn is_proxy(&self) -> bool {
        self.role == PROXY_ROLE
    }

    /// Election key for the configured member role.
    pub fn election_key(&self) -> String {
        format!("{}{}", self.election.key_prefix, self.role)
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8000").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8000".to_string(),
        }
    }
}

/// Coordination backend (Consul agent) connection.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CoordinationConfig {
    /// Agent HTTP address.
    pub address: String,

    /// ACL token sent with every request.
    pub token: Option<String>,

    /// Datacenter to query; the agent's own when unset.
    pub datacenter: Option<String>,

    /// Maximum duration of a blocking query in seconds.
    pub wait_secs: u64,

    /// Per-request HTTP timeout in seconds. Must exceed `wait_secs`.
    pub request_timeout_secs: u64,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:8500".to_string(),
            token: None,
            datacenter: None,
            wait_secs: 300,
            request_timeout_secs: 360,
        }
    }
}

/// Leader election configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ElectionConfig {
    /// Prefix of every election key; the role name is appended.
    pub key_prefix: String,

    /// Identity registered as the session name. Defaults to the host name.
    pub identity: Option<String>,

    /// Session liveness TTL in seconds.
    pub session_ttl_secs: u64,

    /// Lock delay in seconds after a session is invalidated.
    pub lock_delay_secs: u64,

    /// Pause after a failed acquisition attempt, in milliseconds.
    pub retry_delay_ms: u64,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            key_prefix: "xmicro/election/".to_string(),
            identity: None,
            session_ttl_secs: 10,
            lock_delay_secs: 5,
            retry_delay_ms: 5000,
        }
    }
}

/// How the dispatcher reaches a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Connection pool per service; the dialer picks and fails over endpoints.
    Pooled,
    /// Endpoint picked per request; no failover.
    Direct,
}

/// Request forwarding configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub mode: DispatchMode,

    /// Idle connections kept per service (pooled) or endpoint (direct).
    pub max_idle_conns_per_host: usize,

    /// Never reuse upstream connections. When reuse is enabled, a service's
    /// idle connections are dropped whenever its endpoint set changes.
    pub disable_keep_alives: bool,

    /// Upstream connect timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Deadline for the upstream response headers in seconds.
    pub response_header_timeout_secs: u64,

    /// How long an idle pooled connection is kept, in seconds.
    pub pool_idle_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mode: DispatchMode::Pooled,
            max_idle_conns_per_host: 500,
            disable_keep_alives: true,
            connect_timeout_ms: 2000,
            response_header_timeout_secs: 10,
            pool_idle_timeout_secs: 90,
        }
    }
}

/// Change subscription configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Base delay for the backoff after a failed long poll, in milliseconds.
    pub retry_base_ms: u64,

    /// Maximum backoff delay in milliseconds.
    pub retry_max_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            retry_base_ms: 1000,
            retry_max_ms: 30_000,
        }
    }
}

/// Timeout configuration for inbound requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Admin endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Serve the admin endpoints.
    pub enabled: bool,

    /// Admin bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1:9000".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
