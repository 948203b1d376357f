//! Request handling and transformation.
//!
//! # Responsibilities
//! - Generate and propagate the request ID (`x-request-id`, UUID v4)
//! - Strip hop-by-hop headers before forwarding
//! - Add `X-Forwarded-*` headers and point the request at the upstream
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - Upstream requests are always HTTP/1.1, whatever the client spoke
//! - The Host header is dropped so the client derives it from the new URI

use std::net::SocketAddr;

use axum::http::{header, request, HeaderMap, HeaderName, HeaderValue, Uri, Version};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

/// Header carrying the request ID.
pub const X_REQUEST_ID: &str = "x-request-id";

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_FORWARDED_HOST: &str = "x-forwarded-host";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Headers meaningful only for a single transport-level connection.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Layer assigning a UUID request ID when the client did not send one.
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::x_request_id(MakeRequestUuid)
}

/// Layer copying the request ID onto the response.
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::x_request_id()
}

/// The request ID of a request, or `"unknown"`.
pub fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

/// Remove hop-by-hop headers, including any listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in &listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Rewrite request parts in place so they can be sent to `upstream`.
pub fn prepare_upstream(parts: &mut request::Parts, upstream: Uri, client: Option<SocketAddr>) {
    let original_host = parts
        .headers
        .get(header::HOST)
        .cloned()
        .or_else(|| {
            parts
                .uri
                .authority()
                .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
        });

    strip_hop_by_hop(&mut parts.headers);
    parts.headers.remove(header::HOST);

    if let Some(addr) = client {
        let ip = addr.ip().to_string();
        let forwarded = match parts.headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(prior) => format!("{prior}, {ip}"),
            None => ip,
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded) {
            parts.headers.insert(X_FORWARDED_FOR, value);
        }
    }
    if let Some(host) = original_host {
        if !parts.headers.contains_key(X_FORWARDED_HOST) {
            parts.headers.insert(X_FORWARDED_HOST, host);
        }
    }
    if !parts.headers.contains_key(X_FORWARDED_PROTO) {
        parts.headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
    }

    parts.uri = upstream;
    parts.version = Version::HTTP_11;
}
