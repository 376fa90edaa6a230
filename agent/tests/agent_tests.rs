use modlink_access::{AccessState, LivenessConfig, ReasonKind};
use modlink_agent::ui::{self, UiReceiver};
use modlink_agent::{Agent, AgentConfig, UiCommand, UiMessage};
use modlink_api::ServiceConfig;
use modlink_items::FileKind;
use modlink_license::{SecretStore, Session, SessionStore};
use modlink_types::ItemId;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(dir: &Path, server: &MockServer) -> AgentConfig {
    AgentConfig {
        data_dir: Some(dir.to_path_buf()),
        check_updates: false,
        session_debounce_ms: 100,
        service: ServiceConfig {
            base_url: server.uri(),
            timeout_secs: 2,
            download_timeout_secs: 2,
        },
        liveness: LivenessConfig::default(),
        ..Default::default()
    }
}

struct Fixture {
    dir: TempDir,
    server: MockServer,
}

impl Fixture {
    async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("device.id"), "ABCD1234").unwrap();
        Self {
            dir,
            server: MockServer::start().await,
        }
    }

    fn agent(&self, config: AgentConfig) -> (Arc<Agent>, UiReceiver) {
        let (queue, rx) = ui::channel();
        (Agent::new(config, queue).unwrap(), rx)
    }

    fn config(&self) -> AgentConfig {
        config(self.dir.path(), &self.server)
    }

    async fn mount_clean_verdicts(&self) {
        Mock::given(method("GET"))
            .and(path("/maintenance"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"active": false})))
            .mount(&self.server)
            .await;
        Mock::given(method("POST"))
            .and(path("/restriction"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"is_restricted": false})))
            .mount(&self.server)
            .await;
    }
}

/// Waits for the first message matching `wanted`, skipping the rest.
async fn next_matching(rx: &mut UiReceiver, wanted: impl Fn(&UiMessage) -> bool) -> UiMessage {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Some(message) if wanted(&message) => return message,
                Some(_) => {}
                None => panic!("UI queue closed"),
            }
        }
    })
    .await
    .expect("expected UI message never arrived")
}

fn item(s: &str) -> ItemId {
    ItemId::parse(s).unwrap()
}

// ── Startup ─────────────────────────────────────────────────────

#[tokio::test]
async fn startup_posts_access_session_and_items() {
    let fx = Fixture::new().await;
    fx.mount_clean_verdicts().await;
    let markers = fx.dir.path().join("items");
    std::fs::create_dir_all(&markers).unwrap();
    std::fs::write(markers.join("100.dll"), b"").unwrap();

    let (agent, mut rx) = fx.agent(fx.config());
    assert_eq!(agent.device_id(), "ABCD1234");
    agent.start().await.unwrap();

    // The gate publishes on its own task, so arrival order is not fixed.
    let (mut session, mut items, mut access) = (None, None, None);
    while session.is_none() || items.is_none() || access.is_none() {
        match next_matching(&mut rx, |_| true).await {
            m @ UiMessage::Session { .. } => session = Some(m),
            UiMessage::Items { entries } => items = Some(entries),
            UiMessage::Access { access: state } => access = Some(state),
            _ => {}
        }
    }

    assert_eq!(
        session,
        Some(UiMessage::Session {
            username: "Guest".into(),
            premium_status: "Standard".into(),
            guest: true,
        })
    );
    let entries = items.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].file_kind, FileKind::Enabled);
    assert_eq!(access, Some(AccessState::Active));
    assert_eq!(agent.access_state(), AccessState::Active);

    agent.shutdown().await;
}

#[tokio::test]
async fn banned_device_is_redirected() {
    let fx = Fixture::new().await;
    Mock::given(method("GET"))
        .and(path("/maintenance"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"active": false})))
        .mount(&fx.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/restriction"))
        .and(body_partial_json(json!({"hwid": "ABCD1234"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "is_restricted": true,
            "hwid_banned": true,
            "hwid_reason": "Chargeback"
        })))
        .mount(&fx.server)
        .await;

    let (agent, mut rx) = fx.agent(fx.config());
    agent.start().await.unwrap();

    let UiMessage::Access { access } =
        next_matching(&mut rx, |m| matches!(m, UiMessage::Access { .. })).await
    else {
        unreachable!()
    };
    let AccessState::Restricted(verdict) = access else {
        panic!("expected restricted, got {access:?}");
    };
    assert_eq!(verdict.reason_kind, ReasonKind::HwidBanned);
    assert_eq!(verdict.reason_text, "Chargeback");
    assert_eq!(verdict.redirect_path, "restricted");

    agent.shutdown().await;
}

#[tokio::test]
async fn update_check_reports_newer_version_and_notes() {
    let fx = Fixture::new().await;
    fx.mount_clean_verdicts().await;
    Mock::given(method("GET"))
        .and(path("/version"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "latest_version": "9.9.9",
            "mandatory": true,
            "download_url": "https://downloads.example.test/modlink-9.9.9"
        })))
        .mount(&fx.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/patch-notes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "notes": [{"version": "9.9.9", "changes": ["Faster scans"]}]
        })))
        .mount(&fx.server)
        .await;

    let config = AgentConfig {
        check_updates: true,
        app_version: "0.9.2".into(),
        ..fx.config()
    };
    let (agent, mut rx) = fx.agent(config);
    agent.start().await.unwrap();

    let update = next_matching(&mut rx, |m| matches!(m, UiMessage::UpdateAvailable { .. })).await;
    assert_eq!(
        update,
        UiMessage::UpdateAvailable {
            current: "0.9.2".into(),
            latest: "9.9.9".into(),
            mandatory: true,
            download_url: Some("https://downloads.example.test/modlink-9.9.9".into()),
        }
    );
    let UiMessage::PatchNotes { notes } =
        next_matching(&mut rx, |m| matches!(m, UiMessage::PatchNotes { .. })).await
    else {
        unreachable!()
    };
    assert_eq!(notes[0].changes, vec!["Faster scans"]);

    agent.shutdown().await;
}

// ── Activation ──────────────────────────────────────────────────

#[tokio::test]
async fn activation_saves_session_and_starts_reporting() {
    let fx = Fixture::new().await;
    Mock::given(method("POST"))
        .and(path("/activate"))
        .and(body_partial_json(json!({"code": "ABC-123", "hwid": "ABCD1234"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "username": "alice",
            "unique_id": "u-1",
            "premium_expires_in_days": 3
        })))
        .expect(1)
        .mount(&fx.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/heartbeat"))
        .and(body_partial_json(json!({"username": "alice", "unique_id": "u-1"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1..)
        .mount(&fx.server)
        .await;

    let (agent, mut rx) = fx.agent(fx.config());
    agent
        .run_command(UiCommand::Activate {
            url: "modlink://activate?code=ABC-123&username=alice".into(),
        })
        .await;

    let result = next_matching(&mut rx, |m| matches!(m, UiMessage::Activation { .. })).await;
    assert_eq!(
        result,
        UiMessage::Activation {
            ok: true,
            message: "Activated as alice".into(),
        }
    );
    let saved = SessionStore::new(fx.dir.path().join("session.json"))
        .load()
        .unwrap()
        .unwrap();
    assert_eq!(saved.username, "alice");
    assert_eq!(saved.premium_status, "Premium (3 days)");
    assert!(fx.dir.path().join("activation.bin").exists());
    assert_eq!(agent.current_session(), saved);

    // Give the immediate heartbeat time to land before the mock verifies.
    tokio::time::sleep(Duration::from_millis(300)).await;
    agent.shutdown().await;
}

#[tokio::test]
async fn refused_activation_keeps_guest_session() {
    let fx = Fixture::new().await;
    Mock::given(method("POST"))
        .and(path("/activate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "message": "Code already used"
        })))
        .mount(&fx.server)
        .await;

    let (agent, mut rx) = fx.agent(fx.config());
    agent
        .run_command(UiCommand::Activate {
            url: "modlink://activate?code=USED&username=alice".into(),
        })
        .await;

    let result = next_matching(&mut rx, |m| matches!(m, UiMessage::Activation { .. })).await;
    assert_eq!(
        result,
        UiMessage::Activation {
            ok: false,
            message: "Code already used".into(),
        }
    );
    assert!(!fx.dir.path().join("session.json").exists());
    assert!(agent.current_session().is_guest());
}

#[tokio::test]
async fn malformed_activation_link_is_reported() {
    let fx = Fixture::new().await;
    let (agent, mut rx) = fx.agent(fx.config());
    agent
        .run_command(UiCommand::Activate {
            url: "https://example.test/activate?code=X".into(),
        })
        .await;

    let result = next_matching(&mut rx, |m| matches!(m, UiMessage::Activation { .. })).await;
    assert_eq!(
        result,
        UiMessage::Activation {
            ok: false,
            message: "The activation link is not valid.".into(),
        }
    );
}

#[tokio::test]
async fn logout_returns_to_guest() {
    let fx = Fixture::new().await;
    let store = SessionStore::new(fx.dir.path().join("session.json"));
    store
        .save(&Session {
            username: "alice".into(),
            device_id: "ABCD1234".into(),
            unique_id: "u-1".into(),
            premium_status: "Standard".into(),
            raw_verdict: serde_json::Value::Null,
        })
        .unwrap();

    let (agent, mut rx) = fx.agent(fx.config());
    agent.run_command(UiCommand::Logout).await;

    let session = next_matching(&mut rx, |m| matches!(m, UiMessage::Session { .. })).await;
    assert_eq!(
        session,
        UiMessage::Session {
            username: "Guest".into(),
            premium_status: "Standard".into(),
            guest: true,
        }
    );
    assert!(store.load().unwrap().is_none());
    agent.shutdown().await;
}

#[tokio::test]
async fn stored_code_is_redeemed_when_session_is_missing() {
    let fx = Fixture::new().await;
    fx.mount_clean_verdicts().await;
    Mock::given(method("POST"))
        .and(path("/activate"))
        .and(body_partial_json(json!({"code": "STORED-1", "hwid": "ABCD1234"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "username": "alice",
            "unique_id": "u-1"
        })))
        .expect(1)
        .mount(&fx.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/heartbeat"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&fx.server)
        .await;
    SecretStore::new(fx.dir.path().join("activation.bin"), "ABCD1234")
        .save("STORED-1")
        .unwrap();

    let (agent, mut rx) = fx.agent(fx.config());
    agent.start().await.unwrap();

    let session = next_matching(&mut rx, |m| matches!(m, UiMessage::Session { .. })).await;
    assert_eq!(
        session,
        UiMessage::Session {
            username: "alice".into(),
            premium_status: "Standard".into(),
            guest: false,
        }
    );
    let saved = SessionStore::new(fx.dir.path().join("session.json"))
        .load()
        .unwrap()
        .unwrap();
    assert_eq!(saved.unique_id, "u-1");
    agent.shutdown().await;
}

#[tokio::test]
async fn refused_stored_code_is_forgotten() {
    let fx = Fixture::new().await;
    fx.mount_clean_verdicts().await;
    Mock::given(method("POST"))
        .and(path("/activate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "message": "Code revoked"
        })))
        .mount(&fx.server)
        .await;
    let secrets = SecretStore::new(fx.dir.path().join("activation.bin"), "ABCD1234");
    secrets.save("REVOKED").unwrap();

    let (agent, mut rx) = fx.agent(fx.config());
    agent.start().await.unwrap();

    let session = next_matching(&mut rx, |m| matches!(m, UiMessage::Session { .. })).await;
    assert!(matches!(session, UiMessage::Session { guest: true, .. }));
    assert_eq!(secrets.load().unwrap(), None);
    assert!(!fx.dir.path().join("session.json").exists());
    agent.shutdown().await;
}

#[tokio::test]
async fn stored_code_is_ignored_while_a_session_exists() {
    let fx = Fixture::new().await;
    fx.mount_clean_verdicts().await;
    Mock::given(method("POST"))
        .and(path("/activate"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&fx.server)
        .await;
    SessionStore::new(fx.dir.path().join("session.json"))
        .save(&Session {
            username: "bob".into(),
            device_id: "ABCD1234".into(),
            unique_id: "u-2".into(),
            premium_status: "Standard".into(),
            raw_verdict: serde_json::Value::Null,
        })
        .unwrap();
    SecretStore::new(fx.dir.path().join("activation.bin"), "ABCD1234")
        .save("STORED-1")
        .unwrap();

    let (agent, mut rx) = fx.agent(fx.config());
    agent.start().await.unwrap();

    let session = next_matching(&mut rx, |m| matches!(m, UiMessage::Session { .. })).await;
    assert!(matches!(session, UiMessage::Session { ref username, .. } if username == "bob"));
    agent.shutdown().await;
}

// ── Session watching ────────────────────────────────────────────

#[tokio::test]
async fn session_rewritten_on_disk_is_picked_up() {
    let fx = Fixture::new().await;
    fx.mount_clean_verdicts().await;
    let (agent, mut rx) = fx.agent(fx.config());
    agent.start().await.unwrap();
    next_matching(&mut rx, |m| matches!(m, UiMessage::Session { .. })).await;

    SessionStore::new(fx.dir.path().join("session.json"))
        .save(&Session {
            username: "bob".into(),
            device_id: "ABCD1234".into(),
            unique_id: "u-2".into(),
            premium_status: "Standard".into(),
            raw_verdict: serde_json::Value::Null,
        })
        .unwrap();

    let session = next_matching(&mut rx, |m| {
        matches!(m, UiMessage::Session { username, .. } if username == "bob")
    })
    .await;
    assert_eq!(
        session,
        UiMessage::Session {
            username: "bob".into(),
            premium_status: "Standard".into(),
            guest: false,
        }
    );
    agent.shutdown().await;
}

// ── Items ───────────────────────────────────────────────────────

#[tokio::test]
async fn toggle_command_renames_marker() {
    let fx = Fixture::new().await;
    let markers = fx.dir.path().join("items");
    std::fs::create_dir_all(&markers).unwrap();
    std::fs::write(markers.join("100.dll"), b"payload").unwrap();

    let (agent, mut rx) = fx.agent(fx.config());
    agent
        .run_command(UiCommand::Toggle {
            id: item("100"),
            enable: false,
        })
        .await;

    let toggled = next_matching(&mut rx, |m| matches!(m, UiMessage::Toggled { .. })).await;
    assert_eq!(
        toggled,
        UiMessage::Toggled {
            id: item("100"),
            enabled: false,
            ok: true,
            message: None,
        }
    );
    let UiMessage::Items { entries } =
        next_matching(&mut rx, |m| matches!(m, UiMessage::Items { .. })).await
    else {
        unreachable!()
    };
    assert_eq!(entries[0].file_kind, FileKind::Disabled);
    assert!(!markers.join("100.dll").exists());
    assert_eq!(std::fs::read(markers.join("100.disabled")).unwrap(), b"payload");
}

#[tokio::test]
async fn remove_command_deletes_marker_and_rescans() {
    let fx = Fixture::new().await;
    let markers = fx.dir.path().join("items");
    std::fs::create_dir_all(&markers).unwrap();
    std::fs::write(markers.join("7.disabled"), b"").unwrap();

    let (agent, mut rx) = fx.agent(fx.config());
    agent.run_command(UiCommand::Remove { id: item("7") }).await;

    let removed = next_matching(&mut rx, |m| matches!(m, UiMessage::Removed { .. })).await;
    assert_eq!(
        removed,
        UiMessage::Removed {
            id: item("7"),
            outcome: Some(modlink_items::RemoveOutcome::Removed),
            message: None,
        }
    );
    let items = next_matching(&mut rx, |m| matches!(m, UiMessage::Items { .. })).await;
    assert_eq!(items, UiMessage::Items { entries: vec![] });
}

#[tokio::test]
async fn failed_install_posts_short_status() {
    let fx = Fixture::new().await;
    Mock::given(method("GET"))
        .and(path("/items/55"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&fx.server)
        .await;

    let (agent, mut rx) = fx.agent(fx.config());
    agent.run_command(UiCommand::Install { id: item("55") }).await;

    let first = next_matching(&mut rx, |m| matches!(m, UiMessage::Status { .. })).await;
    assert_eq!(first, UiMessage::Status { text: "Installing item 55".into() });
    let second = next_matching(&mut rx, |m| matches!(m, UiMessage::Status { .. })).await;
    assert_eq!(
        second,
        UiMessage::Status {
            text: "The download could not be installed.".into()
        }
    );
}

// ── Lifecycle ───────────────────────────────────────────────────

#[tokio::test]
async fn shutdown_command_releases_waiter() {
    let fx = Fixture::new().await;
    fx.mount_clean_verdicts().await;
    let (agent, _rx) = fx.agent(fx.config());
    agent.start().await.unwrap();

    let waiter = {
        let agent = Arc::clone(&agent);
        tokio::spawn(async move { agent.shutdown_requested().await })
    };
    agent.handle_command(UiCommand::Shutdown);
    tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap();

    agent.shutdown().await;
    agent.shutdown().await;
    assert_eq!(agent.access_state(), AccessState::Unchecked);
}
