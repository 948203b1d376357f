//! Service name extraction from request paths.

use axum::http::uri::PathAndQuery;
use axum::http::Uri;
use thiserror::Error;

/// Why a request path does not name a service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("path does not name a service")]
    MissingService,

    #[error("invalid service name '{0}'")]
    InvalidService(String),

    #[error("invalid upstream path: {0}")]
    InvalidPath(String),
}

/// Where a request is headed: the service and the path forwarded to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTarget {
    pub service: String,
    /// Path with the service segment stripped, query string preserved.
    pub path_and_query: PathAndQuery,
}

fn valid_service_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

impl ServiceTarget {
    /// Split `/<service>/<rest>` into the service and `/<rest>`.
    ///
    /// `/<service>` forwards to `/`. An empty path or `/` fails.
    pub fn parse(uri: &Uri) -> Result<Self, RouteError> {
        let path = uri.path().strip_prefix('/').unwrap_or(uri.path());
        let (service, rest) = match path.split_once('/') {
            Some((service, rest)) => (service, rest),
            None => (path, ""),
        };

        if service.is_empty() {
            return Err(RouteError::MissingService);
        }
        if !service.chars().all(valid_service_char) {
            return Err(RouteError::InvalidService(service.to_string()));
        }

        let forwarded = match uri.query() {
            Some(query) => format!("/{rest}?{query}"),
            None => format!("/{rest}"),
        };
        let path_and_query = forwarded
            .parse::<PathAndQuery>()
            .map_err(|e| RouteError::InvalidPath(e.to_string()))?;

        Ok(Self {
            service: service.to_string(),
            path_and_query,
        })
    }
}
