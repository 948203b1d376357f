//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatcher resolves service name
//!     → Registry::lookup (owned copy of the endpoints)
//!     → random.rs (uniform pick)
//!     → failover.rs (dial; on refusal drop the endpoint from the local
//!       copy and pick again, at most once per endpoint)
//!     → connected stream handed to the HTTP client
//! ```
//!
//! # Design Decisions
//! - Selection is stateless; no connection counts or health scores are kept
//! - Endpoints that refuse a dial are only skipped for that request, the
//!   registry stays the single source of truth

pub mod failover;
pub mod random;

pub use failover::{dial_with_failover, DialError, FailoverConnector};
pub use random::RandomSelector;

use crate::registry::Endpoint;

/// Strategy choosing among candidate endpoints.
pub trait LoadBalancer: Send + Sync {
    /// Index into `endpoints` of the one to use; `None` when empty.
    fn next_index(&self, endpoints: &[Endpoint]) -> Option<usize>;

    /// Convenience wrapper returning the endpoint itself.
    fn next_server<'a>(&self, endpoints: &'a [Endpoint]) -> Option<&'a Endpoint> {
        self.next_index(endpoints).map(|i| &endpoints[i])
    }
}
