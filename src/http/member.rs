//! Status API served by member processes.
//!
//! `GET /` reports the election view of this process, `GET /ping` answers
//! `pong`. Every response carries `Server: mesh-proxy`.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderValue},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::election::Election;

/// Value of the `Server` response header.
pub const SERVER_NAME: &str = "mesh-proxy";

#[derive(Clone)]
pub struct MemberState {
    pub election: Arc<Election>,
    pub hostname: String,
    pub role: String,
}

#[derive(Debug, Serialize)]
pub struct MemberStatus {
    pub status: String,
    pub hostname: String,
    pub leader: String,
    pub is_leader: bool,
    pub role: String,
}

pub fn setup_member_router(state: MemberState) -> Router {
    Router::new()
        .route("/", get(get_status))
        .route("/ping", get(ping))
        .layer(SetResponseHeaderLayer::overriding(
            header::SERVER,
            HeaderValue::from_static(SERVER_NAME),
        ))
        .with_state(state)
}

/// Human readable election status.
pub fn describe(leader: &str, is_leader: bool) -> String {
    if leader.is_empty() {
        "Leader election in process".to_string()
    } else {
        format!("Acting as leader {is_leader}")
    }
}

async fn get_status(State(state): State<MemberState>) -> Json<MemberStatus> {
    let leader = state.election.current_leader().await;
    let is_leader = state.election.is_leader();
    Json(MemberStatus {
        status: describe(&leader, is_leader),
        hostname: state.hostname.clone(),
        leader,
        is_leader,
        role: state.role.clone(),
    })
}

async fn ping() -> &'static str {
    "pong"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe() {
        assert_eq!(describe("", false), "Leader election in process");
        assert_eq!(describe("node-a", true), "Acting as leader true");
        assert_eq!(describe("node-b", false), "Acting as leader false");
    }
}
