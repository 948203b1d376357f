//! Whole-process lifecycle against an in-memory backend.

use std::time::Duration;

use reqwest::StatusCode;
use tokio::sync::oneshot;

use mesh_proxy::lifecycle::run_until;

mod common;
use common::*;

async fn free_port() -> u16 {
    dead_addr().await.port()
}

#[tokio::test]
async fn test_proxy_role_serves_admin_and_shuts_down() {
    let backend = memory_backend();
    let web = start_echo_backend("web").await;
    backend.register(instance("web", "web-1", web, &[]));

    let mut config = test_config();
    config.listener.bind_address = format!("127.0.0.1:{}", free_port().await);
    config.admin.bind_address = format!("127.0.0.1:{}", free_port().await);
    let proxy_url = format!("http://{}", config.listener.bind_address);
    let admin_url = format!("http://{}", config.admin.bind_address);

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let run = tokio::spawn(run_until(config, backend, async move {
        let _ = stop_rx.await;
    }));

    let client = reqwest::Client::new();
    let mut proxied = None;
    for _ in 0..100 {
        if let Ok(resp) = client.get(format!("{proxy_url}/web/x")).send().await {
            if resp.status() == StatusCode::OK {
                proxied = Some(resp.text().await.unwrap());
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(proxied.as_deref(), Some("web GET /x"));

    let registry: serde_json::Value = client
        .get(format!("{admin_url}/admin/registry"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(registry["web"][0], web.to_string());

    let status: serde_json::Value = client
        .get(format!("{admin_url}/admin/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["role"], "proxy");
    assert_eq!(status["services"], 1);

    stop_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("shutdown hung")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_member_role_releases_lock_on_shutdown() {
    let backend = memory_backend();
    let mut config = test_config();
    config.role = "checkout".into();
    config.election.identity = Some("checkout-v2".into());
    config.listener.bind_address = format!("127.0.0.1:{}", free_port().await);

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let run = tokio::spawn(run_until(config, backend.clone(), async move {
        let _ = stop_rx.await;
    }));

    eventually(|| backend.lock_holder("xmicro/election/checkout").as_deref() == Some("checkout-v2")).await;

    stop_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("shutdown hung")
        .unwrap()
        .unwrap();
    assert_eq!(backend.lock_holder("xmicro/election/checkout"), None);
}
