//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request path "/<service>/<rest>?<query>"
//!     → path.rs (split first segment)
//!     → ServiceTarget { service, path_and_query: "/<rest>?<query>" }
//!     → Dispatcher looks the service up in the registry
//! ```
//!
//! # Design Decisions
//! - The first path segment is the only routing input; host and headers are
//!   ignored
//! - Parsing is pure and allocation-light; no route table exists
//! - Malformed paths are rejected before any registry access

pub mod path;

pub use path::{RouteError, ServiceTarget};
