//! Leader election subsystem.
//!
//! # Data Flow
//! ```text
//! Election::start(identity, key)
//!     → engine.rs task: current leader (log) → acquire_lock (blocks)
//!         → Leader: wait for session loss or stop
//!         → loss: Candidate, release, compete again
//!         → error: wait retry delay, compete again
//!     → state.rs (AtomicU8 flag read by is_leader())
//!
//! Election::stop()
//!     → cancel → task releases the key → Stopped
//! ```
//!
//! # Design Decisions
//! - Mutual exclusion comes from the coordination backend's lock, not from
//!   any protocol of our own
//! - The leadership flag and the registry's view of the leader are only
//!   eventually consistent with each other

pub mod engine;
pub mod state;

pub use engine::Election;
pub use state::ElectionState;
