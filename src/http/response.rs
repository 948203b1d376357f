//! Response handling and error mapping.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers from upstream responses
//! - Map dispatch failures to HTTP status codes
//!
//! # Design Decisions
//! - Streaming responses avoid buffering entire body
//! - Unknown services are 503, malformed paths 400; callers can tell them apart
//! - Backend timeouts result in 504 Gateway Timeout

use std::time::Duration;

use axum::body::Body;
use axum::http::{Response, StatusCode};
use axum::response::IntoResponse;
use thiserror::Error;

use crate::http::request::strip_hop_by_hop;
use crate::load_balancer::DialError;
use crate::routing::RouteError;

/// A request that could not be proxied.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("bad request path: {0}")]
    Route(#[from] RouteError),

    #[error("service '{0}' not found")]
    ServiceNotFound(String),

    #[error("no endpoint of service '{0}' accepted a connection")]
    Unreachable(String),

    #[error("upstream did not answer within {0:?}")]
    Timeout(Duration),

    #[error("upstream request failed: {0}")]
    Upstream(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Route(_) => StatusCode::BAD_REQUEST,
            ProxyError::ServiceNotFound(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Unreachable(_) | ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Classify an error from the upstream HTTP client.
    pub fn from_client(service: &str, err: hyper_util::client::legacy::Error) -> Self {
        let mut source: Option<&(dyn std::error::Error + 'static)> = Some(&err);
        while let Some(e) = source {
            if let Some(dial) = e.downcast_ref::<DialError>() {
                return match dial {
                    DialError::NoEndpoints(_) => ProxyError::ServiceNotFound(service.to_string()),
                    DialError::Exhausted { .. } => ProxyError::Unreachable(service.to_string()),
                    DialError::MissingService => ProxyError::Upstream(dial.to_string()),
                };
            }
            source = e.source();
        }
        if err.is_connect() {
            return ProxyError::Unreachable(service.to_string());
        }
        ProxyError::Upstream(err.to_string())
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> axum::response::Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// Prepare an upstream response to be streamed back to the client.
pub fn from_upstream(mut response: Response<Body>) -> Response<Body> {
    strip_hop_by_hop(response.headers_mut());
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ProxyError::Route(RouteError::MissingService).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ProxyError::ServiceNotFound("a".into()).status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ProxyError::Unreachable("a".into()).status(), StatusCode::BAD_GATEWAY);
        assert_eq!(ProxyError::Upstream("x".into()).status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            ProxyError::Timeout(Duration::from_secs(10)).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn test_error_body() {
        let response = ProxyError::ServiceNotFound("checkout".into()).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_from_upstream_strips_headers() {
        let upstream = Response::builder()
            .header(header::CONNECTION, "close")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from("hi"))
            .unwrap();
        let response = from_upstream(upstream);
        assert!(response.headers().get(header::CONNECTION).is_none());
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
    }
}
