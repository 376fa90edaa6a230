//! End-to-end startup against a mock service.

use modlink_access::{
    AccessGate, AccessState, BlockList, GateConfig, GateRunner, LivenessConfig, LivenessReporter,
    ReasonKind,
};
use modlink_api::{ServiceClient, ServiceConfig};
use modlink_license::{DeviceIdentity, SessionStore};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> Arc<ServiceClient> {
    let config = ServiceConfig {
        base_url: server.uri(),
        timeout_secs: 2,
        download_timeout_secs: 2,
    };
    Arc::new(ServiceClient::new(config, "modlink-test").unwrap())
}

#[tokio::test]
async fn fresh_device_reaches_active_and_reports_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/maintenance"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"active": false})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/restriction"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"is_restricted": false})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/heartbeat"))
        .and(body_partial_json(serde_json::json!({"hwid": "ABCD1234"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let device = DeviceIdentity::load_or_create_with(dir.path().join("device.id"), || {
        "ABCD1234".to_string()
    })
    .unwrap();
    assert_eq!(
        std::fs::read_to_string(dir.path().join("device.id")).unwrap().trim(),
        "ABCD1234"
    );

    let sessions = SessionStore::new(dir.path().join("session.json"));
    let api = client(&server);
    let gate = AccessGate::new(
        api.clone(),
        sessions.clone(),
        device.id(),
        BlockList::default(),
        Duration::from_secs(2),
    );
    let handle = GateRunner::start(gate, GateConfig::default());
    let mut rx = handle.subscribe();
    let state = tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|s| *s != AccessState::Unchecked),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();
    assert_eq!(state, AccessState::Active);

    let session = sessions.load_or_guest(device.id()).unwrap();
    let config = LivenessConfig {
        report_guests: true,
        ..Default::default()
    };
    let mut liveness = LivenessReporter::new(api, config, "1.0.0");
    assert!(liveness.start(&session).await);
    tokio::time::sleep(Duration::from_millis(300)).await;

    liveness.stop().await;
    handle.stop().await;
    server.verify().await;
}

#[tokio::test]
async fn hwid_ban_reason_surfaces() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/maintenance"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"active": false})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/restriction"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "is_restricted": true,
            "hwid_banned": true,
            "hwid_reason": "blocked"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let gate = AccessGate::new(
        client(&server),
        SessionStore::new(dir.path().join("session.json")),
        "ABCD1234",
        BlockList::default(),
        Duration::from_secs(2),
    );
    let config = GateConfig {
        restriction_poll_secs: 1,
        ..Default::default()
    };
    let handle = GateRunner::start(gate, config);
    let mut rx = handle.subscribe();
    let state = tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|s| *s != AccessState::Unchecked),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();

    match state {
        AccessState::Restricted(v) => {
            assert_eq!(v.reason_kind, ReasonKind::HwidBanned);
            assert_eq!(v.reason_text, "blocked");
        }
        other => panic!("expected restricted, got {other:?}"),
    }

    // Even with a one-second poll interval nothing else is sent.
    tokio::time::sleep(Duration::from_millis(2500)).await;
    handle.stop().await;
    server.verify().await;
}
