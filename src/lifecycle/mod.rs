//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Bind listeners → Start role subsystem → Serve
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Stop subsystems → Drain → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Fail fast: bind errors abort before any background task starts
//! - Ordered shutdown: stop accepting, release the election key or cancel
//!   the watches, then wait for in-flight requests

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{cancelled, stop_all, Shutdown, Stoppable};
pub use startup::{local_hostname, run, run_until, StartupError};
