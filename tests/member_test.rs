//! Member role: election plus status API.

use std::sync::Arc;

use reqwest::StatusCode;
use tokio::net::TcpListener;

use mesh_proxy::lifecycle::Shutdown;
use mesh_proxy::{Election, HttpServer};

mod common;
use common::*;

const KEY: &str = "xmicro/election/checkout";

#[tokio::test]
async fn test_status_api_reports_leadership() {
    let backend = memory_backend();
    let mut config = test_config();
    config.role = "checkout".into();

    let election = Arc::new(Election::start(backend.clone(), "node-a", config.election_key(), &config.election));
    eventually(|| election.is_leader()).await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server = HttpServer::member(election.clone(), "host-a".into(), &config);
    let handle = tokio::spawn(server.run(listener, shutdown.subscribe()));

    let resp = reqwest::get(format!("http://{addr}/")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["server"], "mesh-proxy");
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "Acting as leader true");
    assert_eq!(body["hostname"], "host-a");
    assert_eq!(body["leader"], "node-a");
    assert_eq!(body["role"], "checkout");

    let ping = reqwest::get(format!("http://{addr}/ping")).await.unwrap();
    assert_eq!(ping.headers()["server"], "mesh-proxy");
    assert_eq!(ping.text().await.unwrap(), "pong");

    election.stop().await;
    let body: serde_json::Value = reqwest::get(format!("http://{addr}/"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "Leader election in process");
    assert_eq!(body["is_leader"], false);

    shutdown.trigger();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_follower_sees_other_leader() {
    let backend = memory_backend();
    backend.hold_lock(KEY, "node-b").unwrap();
    let config = test_config();

    let election = Election::start(backend.clone(), "node-a", KEY, &config.election);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert!(!election.is_leader());
    assert_eq!(election.current_leader().await, "node-b");

    election.stop().await;
    assert_eq!(backend.lock_holder(KEY).as_deref(), Some("node-b"));
}
