//! Admin endpoints of the proxy process.
//!
//! Served on a separate listener so they never collide with proxied paths.

pub mod handlers;

use axum::{routing::get, Router};

use self::handlers::*;

pub use self::handlers::AdminState;

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/registry", get(get_registry))
        .with_state(state)
}
