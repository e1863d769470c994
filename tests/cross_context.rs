mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use authsync::auth::AuthError;
use authsync::config::{load_config, ConfigV1, SyncConfig};
use authsync::models::{MessageType, SyncMessage};
use authsync::state::{default_context, AuthContext, Origin};
use authsync::storage::StorageArea;
use authsync::sync::BroadcastHub;
use authsync::utils::clock::ManualClock;
use common::{connect, eventually, settle, test_config, FakeBoundary};
use mockito::Server;
use serde_json::Value;

#[tokio::test]
async fn test_sign_in_reaches_peer_but_not_sender() {
    let origin = Origin::in_memory();
    let clock = ManualClock::new(1_000);
    let config = test_config();
    let a_boundary = FakeBoundary::signed_in("u1", "s1");
    let b_boundary = FakeBoundary::signed_in("u1", "s1");
    let a = connect(&config, &origin, a_boundary.clone(), &clock);
    let b = connect(&config, &origin, b_boundary.clone(), &clock);

    let notified = Arc::new(AtomicUsize::new(0));
    let counter = notified.clone();
    let _subscription = a.store().subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    a.client
        .sign_in(common::user("u1"), common::session("u1", "s1"));

    assert!(eventually(|| b.client.get_state().is_authenticated).await);
    assert!(
        eventually(|| a.metrics.sync_message_count("suppressed", "SIGN_IN", "channel") == 1.0)
            .await
    );
    settle().await;

    assert_eq!(notified.load(Ordering::SeqCst), 1);
    assert_eq!(a_boundary.calls(), 0, "sender must not react to its own hint");
    assert_eq!(b_boundary.user_calls(), 1, "one sign-in, one check");

    a.destroy();
    b.destroy();
}

#[tokio::test]
async fn test_foreign_channel_message_triggers_exactly_one_check() {
    let origin = Origin::in_memory();
    let clock = ManualClock::new(1_000);
    let config = test_config();
    let boundary = FakeBoundary::signed_out();
    let b = connect(&config, &origin, boundary.clone(), &clock);

    let raw = origin
        .channels
        .open(&config.sync.channel_name)
        .expect("channels supported");
    raw.post_raw("not json").unwrap();
    raw.post_raw(r#"{"type":"SIGN_OUT","payload":null,"timestamp":1,"tabId":"foreign"}"#)
        .unwrap();

    assert!(eventually(|| boundary.user_calls() == 1).await);
    settle().await;
    assert_eq!(boundary.user_calls(), 1);
    assert!(!b.client.get_state().is_authenticated);

    b.destroy();
}

#[tokio::test]
async fn test_peer_sign_out_causes_one_check() {
    let origin = Origin::in_memory();
    let clock = ManualClock::new(1_000);
    let config = test_config();
    let a = connect(&config, &origin, FakeBoundary::signed_out(), &clock);
    a.client
        .sign_in(common::user("u1"), common::session("u1", "s1"));

    let b_boundary = FakeBoundary::signed_out();
    let b = connect(&config, &origin, b_boundary.clone(), &clock);
    assert!(b.client.get_state().is_authenticated);

    // State-key removal, channel SIGN_OUT and sync-key SIGN_OUT all land together.
    a.client.sign_out();
    assert!(eventually(|| !b.client.get_state().is_authenticated).await);
    settle().await;
    assert_eq!(b_boundary.user_calls(), 1);

    // A later hint is checked again.
    let raw = origin.channels.open(&config.sync.channel_name).unwrap();
    raw.post_raw(r#"{"type":"SIGN_IN","payload":null,"timestamp":2,"tabId":"foreign"}"#)
        .unwrap();
    assert!(eventually(|| b_boundary.user_calls() == 2).await);
    settle().await;
    assert_eq!(b_boundary.user_calls(), 2);

    a.destroy();
    b.destroy();
}

#[tokio::test]
async fn test_message_with_own_tab_id_is_ignored() {
    let origin = Origin::in_memory();
    let clock = ManualClock::new(1_000);
    let config = test_config();
    let boundary = FakeBoundary::signed_out();
    let b = connect(&config, &origin, boundary.clone(), &clock);

    let raw = origin.channels.open(&config.sync.channel_name).unwrap();
    let spoofed = SyncMessage::new(MessageType::SignOut, Value::Null, b.tab_id(), 1);
    raw.post_raw(&serde_json::to_string(&spoofed).unwrap())
        .unwrap();

    settle().await;
    assert_eq!(boundary.calls(), 0);

    b.destroy();
}

#[tokio::test]
async fn test_sign_out_syncs_through_storage_when_channels_are_missing() {
    let origin = Origin::new(StorageArea::memory(), BroadcastHub::unsupported());
    let clock = ManualClock::new(1_000);
    let config = test_config();
    let a = connect(&config, &origin, FakeBoundary::signed_out(), &clock);
    let b_boundary = FakeBoundary::signed_in("u1", "s1");
    let b = connect(&config, &origin, b_boundary.clone(), &clock);
    assert_eq!(b.client.sync().transport_names(), vec!["storage"]);

    a.client
        .sign_in(common::user("u1"), common::session("u1", "s1"));
    assert!(eventually(|| b.client.get_state().is_authenticated).await);

    b_boundary.respond(Err(AuthError::AuthExpired));
    a.client.sign_out();
    assert!(eventually(|| !b.client.get_state().is_authenticated).await);
    assert!(b.client.get_state().user.is_none());

    a.destroy();
    b.destroy();
}

#[tokio::test]
async fn test_sync_disabled_keeps_contexts_apart() {
    let origin = Origin::in_memory();
    let clock = ManualClock::new(1_000);
    let config = ConfigV1 {
        sync: SyncConfig {
            enabled: false,
            ..Default::default()
        },
        ..test_config()
    };
    let a = connect(&config, &origin, FakeBoundary::signed_out(), &clock);
    let b_boundary = FakeBoundary::signed_in("u1", "s1");
    let b = connect(&config, &origin, b_boundary.clone(), &clock);

    a.client
        .sign_in(common::user("u1"), common::session("u1", "s1"));
    settle().await;

    assert_eq!(b_boundary.calls(), 0);
    assert!(!b.client.get_state().is_authenticated);

    a.destroy();
    b.destroy();
}

#[tokio::test]
async fn test_new_context_restores_snapshot_until_it_expires() {
    let origin = Origin::in_memory();
    let clock = ManualClock::new(1_000);
    let config = test_config();
    let a = connect(&config, &origin, FakeBoundary::signed_out(), &clock);
    a.client
        .sign_in(common::user("u1"), common::session("u1", "s1"));

    clock.advance(Duration::from_secs(59 * 60));
    let fresh = connect(&config, &origin, FakeBoundary::signed_out(), &clock);
    let state = fresh.client.get_state();
    assert!(state.is_authenticated);
    assert_eq!(state.user.map(|u| u.id).as_deref(), Some("u1"));
    fresh.destroy();

    clock.advance(Duration::from_secs(2 * 60));
    let late = connect(&config, &origin, FakeBoundary::signed_out(), &clock);
    let state = late.client.get_state();
    assert!(!state.is_authenticated);
    assert!(state.user.is_none());
    late.destroy();

    a.destroy();
}

#[tokio::test]
async fn test_file_storage_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    let storage_path = dir.path().join("storage.json");
    std::fs::write(
        &path,
        format!(
            r#"
version: "1.0.0"
storage_prefix: "restart-test"
storage:
  type: file
  path: "{}"
refresh:
  auto_refresh: false
"#,
            storage_path.display()
        ),
    )
    .unwrap();
    let config = load_config(&path).expect("config should load");
    assert_eq!(config.state_key(), "restart-test-state");

    let clock = ManualClock::new(1_000);
    let first = connect(
        &config,
        &Origin::from_config(&config),
        FakeBoundary::signed_out(),
        &clock,
    );
    first
        .client
        .sign_in(common::user("u1"), common::session("u1", "s1"));
    first.destroy();
    assert!(storage_path.exists());

    let second = connect(
        &config,
        &Origin::from_config(&config),
        FakeBoundary::signed_out(),
        &clock,
    );
    assert!(second.client.get_state().is_authenticated);
    second.destroy();
}

#[tokio::test]
async fn test_http_context_checks_on_start() {
    let mut server = Server::new_async().await;
    let user = server
        .mock("GET", "/handler/user")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"user":{"id":"u9","displayName":"Grace"},"session":{"id":"s9","userId":"u9"}}"#)
        .create_async()
        .await;

    let mut config = test_config();
    config.boundary.base_url = server.url();
    config.refresh.check_on_start = true;

    let origin = Origin::in_memory();
    let context = AuthContext::connect_http(Arc::new(config), &origin).unwrap();

    assert!(eventually(|| context.client.get_state().is_authenticated).await);
    user.assert_async().await;
    let state = context.client.get_state();
    assert_eq!(state.user.and_then(|u| u.display_name).as_deref(), Some("Grace"));
    context.destroy();
}

#[tokio::test]
async fn test_default_context_is_shared() {
    let config = test_config();
    let first = default_context(&config).unwrap();
    let second = default_context(&config).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}
