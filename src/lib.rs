//! Service mesh edge: leader election, service registry, reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                       ┌───────────────────────────────────────────────┐
//!                       │                  MESH PROXY                    │
//!   Client Request      │  ┌────────┐   ┌──────────┐   ┌─────────────┐  │
//!   ────────────────────┼─▶│  http  │──▶│ routing  │──▶│  registry   │  │
//!                       │  │ server │   │ /svc/... │   │  snapshot   │  │
//!                       │  └────────┘   └──────────┘   └──────┬──────┘  │
//!                       │                                     ▼         │
//!   Client Response     │  ┌────────┐   ┌──────────────────────────┐    │
//!   ◀───────────────────┼──│response│◀──│ load_balancer (failover) │◀───┼── Backend
//!                       │  └────────┘   └──────────────────────────┘    │
//!                       │                                               │
//!                       │  watcher ──▶ Registry::refresh                │
//!                       │  election (member role)                       │
//!                       │        ▲               ▲                      │
//!                       └────────┼───────────────┼──────────────────────┘
//!                                └─ coordination ┘ (Consul / in-memory)
//! ```

// Core subsystems
pub mod coordination;
pub mod election;
pub mod registry;
pub mod watcher;

// Traffic management
pub mod http;
pub mod load_balancer;
pub mod routing;

// Cross-cutting concerns
pub mod admin;
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::schema::ProxyConfig;
pub use coordination::{ConsulClient, CoordinationClient, MemoryCoordinator};
pub use election::Election;
pub use http::{Dispatcher, HttpServer};
pub use lifecycle::Shutdown;
pub use registry::Registry;
