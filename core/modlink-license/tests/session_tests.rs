use modlink_license::{LoginResponse, Session, SessionStore};
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

fn login(days: Option<i64>) -> LoginResponse {
    LoginResponse {
        success: true,
        username: Some("alice".into()),
        unique_id: Some("u-42".into()),
        account_id: None,
        premium_expires_in_days: days,
        message: None,
    }
}

// ── Decoding rules ───────────────────────────────────────────────

#[test]
fn premium_absent_is_standard() {
    assert_eq!(login(None).premium_status(), "Standard");
}

#[test]
fn premium_days_are_rendered() {
    assert_eq!(login(Some(30)).premium_status(), "Premium (30 days)");
    assert_eq!(login(Some(1)).premium_status(), "Premium (1 day)");
    assert_eq!(login(Some(0)).premium_status(), "Expired");
}

#[test]
fn login_response_tolerates_missing_fields() {
    let resp: LoginResponse = serde_json::from_str(r#"{"success":true}"#).unwrap();
    assert!(resp.success);
    assert!(resp.username.is_none());
    assert!(resp.premium_expires_in_days.is_none());
}

#[test]
fn session_from_login() {
    let raw = json!({"success": true, "unique_id": "u-42"});
    let session = Session::from_login(&login(Some(5)), raw.clone(), "DEV1", "fallback").unwrap();
    assert_eq!(session.username, "alice");
    assert_eq!(session.unique_id, "u-42");
    assert_eq!(session.device_id, "DEV1");
    assert_eq!(session.premium_status, "Premium (5 days)");
    assert_eq!(session.raw_verdict, raw);
    assert!(!session.is_guest());
}

#[test]
fn session_from_login_uses_fallback_username() {
    let mut resp = login(None);
    resp.username = None;
    let session = Session::from_login(&resp, json!({}), "DEV1", "bob").unwrap();
    assert_eq!(session.username, "bob");
}

#[test]
fn failed_login_is_rejected() {
    let resp = LoginResponse {
        success: false,
        message: Some("invalid code".into()),
        ..Default::default()
    };
    let err = Session::from_login(&resp, json!({}), "DEV1", "bob").unwrap_err();
    assert!(err.to_string().contains("invalid code"));
}

#[test]
fn login_without_unique_id_is_rejected() {
    let mut resp = login(None);
    resp.unique_id = None;
    assert!(Session::from_login(&resp, json!({}), "DEV1", "bob").is_err());
}

#[test]
fn guest_session_synthesizes_unique_id() {
    let guest = Session::guest("ABCD1234");
    assert_eq!(guest.unique_id, "guest_ABCD1234");
    assert!(guest.is_guest());
    assert_eq!(guest.premium_status, "Standard");
}

// ── Store ────────────────────────────────────────────────────────

#[test]
fn missing_file_means_no_session() {
    let dir = TempDir::new().unwrap();
    let store = SessionStore::new(dir.path().join("session.json"));
    assert!(store.load().unwrap().is_none());
}

#[test]
fn save_then_load() {
    let dir = TempDir::new().unwrap();
    let store = SessionStore::new(dir.path().join("session.json"));
    let session = Session::from_login(&login(None), json!({"a": 1}), "DEV1", "").unwrap();

    store.save(&session).unwrap();
    assert_eq!(store.load().unwrap(), Some(session));
    assert!(!dir.path().join("session.json.tmp").exists());
}

#[test]
fn save_replaces_wholesale() {
    let dir = TempDir::new().unwrap();
    let store = SessionStore::new(dir.path().join("session.json"));
    store.save(&Session::guest("DEV1")).unwrap();

    let real = Session::from_login(&login(None), json!({}), "DEV1", "").unwrap();
    store.save(&real).unwrap();
    assert_eq!(store.load().unwrap().unwrap().unique_id, "u-42");
}

#[test]
fn malformed_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("session.json");
    std::fs::write(&path, "{not json").unwrap();
    assert!(SessionStore::new(&path).load().is_err());
}

#[test]
fn load_or_guest_falls_back() {
    let dir = TempDir::new().unwrap();
    let store = SessionStore::new(dir.path().join("session.json"));
    assert!(store.load_or_guest("DEV9").unwrap().is_guest());
}

#[test]
fn clear_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = SessionStore::new(dir.path().join("session.json"));
    store.save(&Session::guest("DEV1")).unwrap();
    store.clear().unwrap();
    store.clear().unwrap();
    assert!(store.load().unwrap().is_none());
}

#[test]
fn account_id_comes_from_raw_response() {
    let raw = json!({"success": true, "unique_id": "u-42", "account_id": "acct-7"});
    let session = Session::from_login(&login(None), raw, "DEV1", "alice").unwrap();
    assert_eq!(session.account_id().as_deref(), Some("acct-7"));

    assert!(Session::guest("DEV1").account_id().is_none());
}
