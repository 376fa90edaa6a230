use modlink_instance::{Acquisition, InstanceArbiter, InstanceConfig, InstanceError};
use modlink_license::ActivationPayload;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

static NEXT: AtomicUsize = AtomicUsize::new(0);

/// Unique per test so named pipes never collide.
fn config() -> InstanceConfig {
    InstanceConfig {
        name: format!(
            "modlink-test-{}-{}",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::SeqCst)
        ),
        relay_timeout_secs: 2,
        read_timeout_secs: 2,
        retry_delay_ms: 10,
        ..Default::default()
    }
}

fn primary(arbiter: &InstanceArbiter) -> modlink_instance::PrimaryGuard {
    match arbiter.acquire().unwrap() {
        Acquisition::Primary(guard) => guard,
        Acquisition::Secondary => panic!("expected to become primary"),
    }
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<ActivationPayload>) -> ActivationPayload {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no activation delivered")
        .expect("channel closed")
}

// ── Lock ────────────────────────────────────────────────────────

#[test]
fn second_acquire_is_secondary() {
    let dir = TempDir::new().unwrap();
    let cfg = config();
    let first = InstanceArbiter::new(&cfg, dir.path());
    let second = InstanceArbiter::new(&cfg, dir.path());

    let guard = primary(&first);
    assert!(matches!(second.acquire().unwrap(), Acquisition::Secondary));

    guard.release();
    assert!(matches!(second.acquire().unwrap(), Acquisition::Primary(_)));
}

#[test]
fn lock_file_records_pid() {
    let dir = TempDir::new().unwrap();
    let arbiter = InstanceArbiter::new(&config(), dir.path());
    let _guard = primary(&arbiter);
    let content = std::fs::read_to_string(arbiter.lock_path()).unwrap();
    assert_eq!(content, std::process::id().to_string());
}

#[test]
fn dropping_guard_releases_lock() {
    let dir = TempDir::new().unwrap();
    let cfg = config();
    let arbiter = InstanceArbiter::new(&cfg, dir.path());
    drop(primary(&arbiter));
    assert!(matches!(arbiter.acquire().unwrap(), Acquisition::Primary(_)));
}

// ── Relay ───────────────────────────────────────────────────────

#[tokio::test]
async fn relay_reaches_primary() {
    let dir = TempDir::new().unwrap();
    let cfg = config();
    let arbiter = InstanceArbiter::new(&cfg, dir.path());
    let guard = primary(&arbiter);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let listener = guard
        .start_listening(move |payload| {
            let _ = tx.send(payload);
        })
        .unwrap();

    let secondary = InstanceArbiter::new(&cfg, dir.path());
    assert!(matches!(secondary.acquire().unwrap(), Acquisition::Secondary));
    let sent = secondary
        .relay("modlink://activate?code=ABC-123&username=bob")
        .await
        .unwrap();
    assert!(sent);

    let payload = recv(&mut rx).await;
    assert_eq!(payload.code, "ABC-123");
    assert_eq!(payload.username, "bob");

    // The loop re-enters accept after each delivery.
    secondary
        .relay("modlink://activate?code=SECOND&username=bob")
        .await
        .unwrap();
    assert_eq!(recv(&mut rx).await.code, "SECOND");

    listener.stop().await;
    guard.release();
}

#[tokio::test]
async fn malformed_payload_does_not_stop_listener() {
    let dir = TempDir::new().unwrap();
    let cfg = config();
    let arbiter = InstanceArbiter::new(&cfg, dir.path());
    let guard = primary(&arbiter);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let listener = guard
        .start_listening(move |payload| {
            let _ = tx.send(payload);
        })
        .unwrap();

    arbiter.relay("not a url at all").await.unwrap();
    arbiter.relay("modlink://activate?username=nocode").await.unwrap();
    arbiter
        .relay("modlink://activate?code=OK&username=eve")
        .await
        .unwrap();

    assert_eq!(recv(&mut rx).await.code, "OK");
    assert!(listener.is_running());
    listener.stop().await;
}

#[tokio::test]
async fn relay_without_listener_fails_fast() {
    let dir = TempDir::new().unwrap();
    let arbiter = InstanceArbiter::new(&config(), dir.path());

    let started = std::time::Instant::now();
    let err = arbiter
        .relay("modlink://activate?code=ABC")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        InstanceError::Connect { .. } | InstanceError::RelayTimeout(_)
    ));
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn empty_payload_is_not_sent() {
    let dir = TempDir::new().unwrap();
    let arbiter = InstanceArbiter::new(&config(), dir.path());
    assert!(!arbiter.relay("   ").await.unwrap());
}

#[tokio::test]
async fn oversized_payload_is_refused() {
    let dir = TempDir::new().unwrap();
    let cfg = InstanceConfig {
        max_payload_bytes: 16,
        ..config()
    };
    let arbiter = InstanceArbiter::new(&cfg, dir.path());
    let err = arbiter
        .relay("modlink://activate?code=WAY-TOO-LONG-FOR-THE-LIMIT")
        .await
        .unwrap_err();
    assert!(matches!(err, InstanceError::PayloadTooLarge(_)));
}

#[tokio::test]
async fn stopped_listener_no_longer_accepts() {
    let dir = TempDir::new().unwrap();
    let cfg = config();
    let arbiter = InstanceArbiter::new(&cfg, dir.path());
    let guard = primary(&arbiter);
    let listener = guard.start_listening(|_| {}).unwrap();
    listener.stop().await;

    assert!(arbiter.relay("modlink://activate?code=LATE").await.is_err());
}
