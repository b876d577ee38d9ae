#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{future::Future, sync::Arc, time::Duration};

use {
    bulkwa_common::{MessageSender, SendError, SessionStatus},
    bulkwa_store::{MemoryStore, SessionStore},
    bulkwa_whatsapp::{
        AuthStore, CloseReason, ReconnectPolicy, SessionError, SessionManager, SessionRegistry,
        TransportEvent, WhatsAppConfig,
        testing::{FakeTransport, OnOpen},
    },
    tempfile::TempDir,
};

struct Harness {
    manager: SessionManager,
    transport: FakeTransport,
    store: Arc<MemoryStore>,
    auth: AuthStore,
    _dir: TempDir,
}

fn config() -> WhatsAppConfig {
    WhatsAppConfig {
        pairing_wait_secs: 1,
        send_timeout_secs: 5,
        reconnect: ReconnectPolicy {
            delay_ms: 50,
            max_attempts: Some(3),
            ..ReconnectPolicy::default()
        },
        ..WhatsAppConfig::default()
    }
}

fn harness(transport: FakeTransport, config: WhatsAppConfig) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let auth = AuthStore::new(dir.path().join("auth"));
    let manager = SessionManager::new(
        Arc::new(transport.clone()),
        Arc::clone(&store) as Arc<dyn SessionStore>,
        Arc::new(SessionRegistry::new()),
        auth.clone(),
        config,
    );
    Harness {
        manager,
        transport,
        store,
        auth,
        _dir: dir,
    }
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..300 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn create_returns_pairing_code() {
    let h = harness(FakeTransport::new(), config());

    let outcome = h.manager.create_session("acct").await.unwrap();
    assert_eq!(outcome.status, SessionStatus::WaitingPairing);
    assert_eq!(outcome.pairing_code.as_deref(), Some("fake-qr-acct-1"));

    let row = h.store.get_session("acct").await.unwrap().unwrap();
    assert_eq!(row.status(), SessionStatus::WaitingPairing);
    assert_eq!(row.pairing_code(), Some("fake-qr-acct-1"));
    assert_eq!(h.store.session_history("acct").await[0], SessionStatus::Initializing);
}

#[tokio::test]
async fn concurrent_creates_open_one_connection() {
    let transport = FakeTransport::new();
    transport.set_on_open(OnOpen::Silent).await;
    let h = harness(transport, config());

    let (first, second) = tokio::join!(
        h.manager.create_session("acct"),
        h.manager.create_session("acct")
    );
    assert_eq!(first.unwrap().status, SessionStatus::Initializing);
    assert_eq!(second.unwrap().status, SessionStatus::Initializing);
    assert_eq!(h.transport.open_count("acct").await, 1);
    assert!(h.manager.registry().is_in_flight("acct").await);
}

#[tokio::test]
async fn connected_session_is_not_reopened() {
    let h = harness(FakeTransport::connecting("15551234567"), config());

    let outcome = h.manager.create_session("acct").await.unwrap();
    assert_eq!(outcome.status, SessionStatus::Connected);
    assert!(outcome.pairing_code.is_none());

    let again = h.manager.create_session("acct").await.unwrap();
    assert_eq!(again.status, SessionStatus::Connected);
    assert_eq!(h.transport.open_count("acct").await, 1);

    let view = h.manager.session_status("acct").await;
    assert!(view.connected);
    assert_eq!(view.identity.as_deref(), Some("15551234567"));
    assert!(!h.manager.registry().is_in_flight("acct").await);
    assert!(h.auth.is_resumable("acct").await);
}

#[tokio::test]
async fn logout_close_is_terminal() {
    let h = harness(FakeTransport::connecting("1555"), config());
    h.manager.create_session("acct").await.unwrap();

    assert!(
        h.transport
            .emit("acct", TransportEvent::Close(CloseReason::logged_out()))
            .await
    );
    eventually(|| async { h.manager.active_session_count().await == 0 }).await;

    let row = h.store.get_session("acct").await.unwrap().unwrap();
    assert_eq!(row.status(), SessionStatus::LoggedOut);
    assert!(!h.auth.account_dir("acct").exists());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.transport.open_count("acct").await, 1);
}

#[tokio::test]
async fn transient_close_reconnects_exactly_once() {
    let h = harness(FakeTransport::connecting("1555"), config());
    h.manager.create_session("acct").await.unwrap();

    h.transport
        .emit(
            "acct",
            TransportEvent::Close(CloseReason::new(Some(428), "connection closed")),
        )
        .await;
    eventually(|| async { h.transport.open_count("acct").await == 2 }).await;
    eventually(|| async { h.manager.session_status("acct").await.connected }).await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.transport.open_count("acct").await, 2);

    let history = h.store.session_history("acct").await;
    let disconnected = history
        .iter()
        .position(|s| *s == SessionStatus::Disconnected)
        .unwrap();
    assert_eq!(history.last(), Some(&SessionStatus::Connected));
    assert!(history[disconnected..].contains(&SessionStatus::Initializing));
    // Paired credentials survive the reconnect.
    assert!(h.transport.last_open("acct").await.unwrap().credentials.is_some());
    // The dropped connection is closed, not just forgotten.
    assert_eq!(h.transport.closes().await, vec!["acct".to_string()]);
}

#[tokio::test]
async fn reconnect_gives_up_after_max_attempts() {
    let h = harness(FakeTransport::connecting("1555"), config());
    h.manager.create_session("acct").await.unwrap();

    h.transport.fail_next_opens(10).await;
    h.transport
        .emit("acct", TransportEvent::Close(CloseReason::transient("reset")))
        .await;

    eventually(|| async { h.manager.active_session_count().await == 0 }).await;
    // One original open plus three failed reconnects.
    assert_eq!(h.transport.open_count("acct").await, 4);
    let row = h.store.get_session("acct").await.unwrap().unwrap();
    assert_eq!(row.status(), SessionStatus::Disconnected);
    assert!(!h.manager.registry().is_in_flight("acct").await);
}

#[tokio::test]
async fn destroy_logs_out_and_forgets_credentials() {
    let h = harness(FakeTransport::connecting("1555"), config());
    h.manager.create_session("acct").await.unwrap();
    assert!(h.auth.account_dir("acct").exists());

    h.manager.destroy_session("acct").await.unwrap();

    assert_eq!(h.transport.logouts().await, vec!["acct".to_string()]);
    assert_eq!(h.manager.active_session_count().await, 0);
    assert!(!h.auth.account_dir("acct").exists());
    let row = h.store.get_session("acct").await.unwrap().unwrap();
    assert_eq!(row.status(), SessionStatus::Disconnected);

    h.manager.destroy_session("never-created").await.unwrap();
}

#[tokio::test]
async fn destroy_while_opening_is_not_undone() {
    let h = harness(FakeTransport::connecting("1555"), config());
    h.transport.set_open_delay(Duration::from_millis(200)).await;

    let create = {
        let manager = h.manager.clone();
        tokio::spawn(async move { manager.create_session("acct").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.manager.destroy_session("acct").await.unwrap();

    let outcome = create.await.unwrap().unwrap();
    assert_eq!(outcome.status, SessionStatus::Disconnected);
    assert!(!h.manager.session_status("acct").await.connected);
    assert_eq!(h.manager.active_session_count().await, 0);
    assert!(!h.manager.registry().is_in_flight("acct").await);
    assert_eq!(h.transport.closes().await, vec!["acct".to_string()]);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let row = h.store.get_session("acct").await.unwrap().unwrap();
    assert_eq!(row.status(), SessionStatus::Disconnected);
    assert!(!h.auth.is_resumable("acct").await);

    h.transport.set_open_delay(Duration::ZERO).await;
    let outcome = h.manager.create_session("acct").await.unwrap();
    assert_eq!(outcome.status, SessionStatus::Connected);
}

#[tokio::test]
async fn store_outage_does_not_block_sessions() {
    let h = harness(FakeTransport::connecting("1555"), config());
    h.store.set_unavailable(true);

    let outcome = h.manager.create_session("acct").await.unwrap();
    assert_eq!(outcome.status, SessionStatus::Connected);
}

#[tokio::test]
async fn open_failure_propagates_and_clears_marker() {
    let h = harness(FakeTransport::new(), config());
    h.transport.fail_next_opens(1).await;

    let err = h.manager.create_session("acct").await.unwrap_err();
    assert!(matches!(err, SessionError::Transport(_)));
    assert!(!h.manager.registry().is_in_flight("acct").await);

    let outcome = h.manager.create_session("acct").await.unwrap();
    assert_eq!(outcome.status, SessionStatus::WaitingPairing);
}

#[tokio::test]
async fn invalid_account_ids_are_rejected() {
    let h = harness(FakeTransport::new(), config());
    assert!(matches!(
        h.manager.create_session("../escape").await,
        Err(SessionError::InvalidAccount(_))
    ));
    assert_eq!(h.transport.open_count("../escape").await, 0);
}

#[tokio::test]
async fn send_requires_connected_session() {
    let h = harness(FakeTransport::connecting("1555"), config());

    assert_eq!(
        h.manager.send("acct", "15550001", "hi", None).await,
        Err(SendError::NotConnected)
    );

    h.manager.create_session("acct").await.unwrap();
    let receipt = h
        .manager
        .send("acct", "+1 555 0001", "hi", None)
        .await
        .unwrap();
    assert_eq!(receipt.to, "15550001@s.whatsapp.net");
    assert!(matches!(
        h.manager.send("acct", "not a number", "hi", None).await,
        Err(SendError::InvalidAddress(_))
    ));

    let sent = h.transport.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].body, "hi");
}

#[tokio::test]
async fn destroy_interrupts_waiting_send() {
    let h = harness(FakeTransport::connecting("1555"), config());
    h.manager.create_session("acct").await.unwrap();
    h.transport.set_send_delay(Duration::from_secs(5)).await;

    let manager = h.manager.clone();
    let send = tokio::spawn(async move { manager.send("acct", "15550001", "hi", None).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.manager.destroy_session("acct").await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(1), send)
        .await
        .expect("send should fail fast")
        .unwrap();
    assert_eq!(result, Err(SendError::NotConnected));
}
