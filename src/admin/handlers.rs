use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::http::Dispatcher;
use crate::registry::Snapshot;

#[derive(Clone)]
pub struct AdminState {
    pub dispatcher: Arc<Dispatcher>,
    pub role: String,
    pub env: String,
    pub started: Instant,
}

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub role: String,
    pub env: String,
    pub uptime_secs: u64,
    pub services: usize,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        role: state.role.clone(),
        env: state.env.clone(),
        uptime_secs: state.started.elapsed().as_secs(),
        services: state.dispatcher.registry().snapshot().len(),
    })
}

/// Current registry snapshot, `{ "<service>": ["host:port", ...] }`.
pub async fn get_registry(State(state): State<AdminState>) -> Json<Snapshot> {
    Json((*state.dispatcher.registry().snapshot()).clone())
}
