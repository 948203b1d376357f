//! Change subscription subsystem.
//!
//! # Data Flow
//! ```text
//! Watcher::subscribe(spec, handler)
//!     → spawn one long-poll task per subscription
//!         → CoordinationClient::wait_for_change(spec, last_index)
//!         → index moved? → handler.handle(index, payload)
//!         → error? → backoff, retry
//!
//! Watcher::stop_all()
//!     → flip every cancel flag → await every task
//! ```
//!
//! # Design Decisions
//! - Bursts may coalesce into one notification; handlers re-read full state
//! - No ordering guarantee across subscriptions
//! - Backend errors never end a subscription, only cancellation does

pub mod subscription;

pub use subscription::{SubscriptionId, WatchHandler, Watcher};
