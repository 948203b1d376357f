//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, trace, timeout layers)
//!     → dispatcher.rs (proxy role)
//!         → routing (service name from first path segment)
//!         → registry lookup → load_balancer (pick / fail over)
//!         → request.rs (hop-by-hop strip, X-Forwarded-*, upstream URI)
//!         → upstream client (pooled or direct)
//!         → response.rs (hop-by-hop strip, error → status)
//!     → member.rs (member role status API)
//!     → Send to client
//! ```

pub mod dispatcher;
pub mod member;
pub mod request;
pub mod response;
pub mod server;

pub use dispatcher::Dispatcher;
pub use request::X_REQUEST_ID;
pub use response::ProxyError;
pub use server::HttpServer;
