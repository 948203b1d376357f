//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses and value ranges (TTL bounds, timeouts > 0)
//! - Validate the election key layout
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;
use url::Url;

use crate::config::schema::ProxyConfig;

/// Backend bounds on session TTL, in seconds.
const MIN_SESSION_TTL: u64 = 10;
const MAX_SESSION_TTL: u64 = 86_400;
/// Backend upper bound on lock delay, in seconds.
const MAX_LOCK_DELAY: u64 = 60;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: '{value}' is not a valid socket address")]
    Address { field: &'static str, value: String },

    #[error("coordination.address: '{0}' is not a valid http(s) URL")]
    CoordinationAddress(String),

    #[error("role must not be empty or contain '/'")]
    Role,

    #[error("election.key_prefix must be non-empty and end with '/', got '{0}'")]
    KeyPrefix(String),

    #[error("election.session_ttl_secs must be within 10..=86400, got {0}")]
    SessionTtl(u64),

    #[error("election.lock_delay_secs must not exceed 60, got {0}")]
    LockDelay(u64),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("coordination.request_timeout_secs ({timeout}) must exceed wait_secs ({wait})")]
    RequestTimeout { timeout: u64, wait: u64 },
}

fn check_addr(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::Address {
            field,
            value: value.to_string(),
        });
    }
}

/// Validate a configuration, collecting every error.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_addr(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.admin.enabled {
        check_addr(&mut errors, "admin.bind_address", &config.admin.bind_address);
    }
    if config.observability.metrics_enabled {
        check_addr(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }

    match Url::parse(&config.coordination.address) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
        _ => errors.push(ValidationError::CoordinationAddress(
            config.coordination.address.clone(),
        )),
    }
    if config.coordination.request_timeout_secs <= config.coordination.wait_secs {
        errors.push(ValidationError::RequestTimeout {
            timeout: config.coordination.request_timeout_secs,
            wait: config.coordination.wait_secs,
        });
    }

    if config.role.is_empty() || config.role.contains('/') {
        errors.push(ValidationError::Role);
    }

    let election = &config.election;
    if election.key_prefix.is_empty() || !election.key_prefix.ends_with('/') {
        errors.push(ValidationError::KeyPrefix(election.key_prefix.clone()));
    }
    if !(MIN_SESSION_TTL..=MAX_SESSION_TTL).contains(&election.session_ttl_secs) {
        errors.push(ValidationError::SessionTtl(election.session_ttl_secs));
    }
    if election.lock_delay_secs > MAX_LOCK_DELAY {
        errors.push(ValidationError::LockDelay(election.lock_delay_secs));
    }

    let zero_checks = [
        ("proxy.connect_timeout_ms", config.proxy.connect_timeout_ms),
        ("proxy.response_header_timeout_secs", config.proxy.response_header_timeout_secs),
        ("timeouts.request_secs", config.timeouts.request_secs),
        ("watch.retry_base_ms", config.watch.retry_base_ms),
        ("coordination.wait_secs", config.coordination.wait_secs),
    ];
    for (field, value) in zero_checks {
        if value == 0 {
            errors.push(ValidationError::Zero(field));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(validate_config(&ProxyConfig::default()), Ok(()));
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = ProxyConfig::default();
        config.listener.bind_address = "nowhere".into();
        config.election.key_prefix = "xmicro/election".into();
        config.election.session_ttl_secs = 5;
        config.timeouts.request_secs = 0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::SessionTtl(5)));
        assert!(errors.contains(&ValidationError::Zero("timeouts.request_secs")));
    }

    #[test]
    fn test_coordination_address() {
        let mut config = ProxyConfig::default();
        config.coordination.address = "consul:8500".into();
        let errors = validate_config(&config).unwrap_err();
        assert!(matches!(errors[0], ValidationError::CoordinationAddress(_)));
    }

    #[test]
    fn test_disabled_admin_address_ignored() {
        let mut config = ProxyConfig::default();
        config.admin.enabled = false;
        config.admin.bind_address = "bogus".into();
        assert!(validate_config(&config).is_ok());
    }
}
