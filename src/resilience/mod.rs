//! Resilience helpers shared by the background loops.
//!
//! # Design Decisions
//! - Transient coordination failures are retried forever, never fatal
//! - Retry delays grow exponentially with jitter so peers do not retry in step

pub mod backoff;

pub use backoff::{calculate_backoff, Backoff};
