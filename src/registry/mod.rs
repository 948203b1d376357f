//! Service registry subsystem.
//!
//! # Data Flow
//! ```text
//! Watcher notification (catalog or election keys changed)
//!     → catalog.rs (RegistryRefresher → Registry::refresh)
//!         → list services → passing instances → leader tag resolution
//!     → snapshot.rs (atomic replace of the whole mapping)
//!
//! Dispatcher request
//!     → Registry::lookup(name) → owned Vec<Endpoint>
//! ```
//!
//! # Design Decisions
//! - Snapshot rebuilt from scratch on every change; no incremental merge
//! - Readers never block writers (ArcSwap), last replace wins
//! - A failed rebuild leaves the previous snapshot authoritative
//! - Unknown names and names without endpoints look the same to callers

pub mod catalog;
pub mod endpoint;
pub mod snapshot;

pub use catalog::{Registry, RegistryError, RegistryRefresher, LEADER_TAG};
pub use endpoint::Endpoint;
pub use snapshot::{Snapshot, SnapshotHolder};
