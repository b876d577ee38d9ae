#![allow(clippy::unwrap_used, clippy::expect_used)]

use {
    bulkwa_common::{Campaign, CampaignStatus, SessionRecord, SessionStatus},
    bulkwa_store::{
        CampaignStore, Heartbeat, HeartbeatStore, MemoryStore, SessionStore, SqliteStore,
        StoreError,
    },
    chrono::{Duration, Utc},
    serde_json::json,
};

fn campaign(id: &str, status: CampaignStatus) -> Campaign {
    Campaign {
        id: id.into(),
        account_id: "acct-1".into(),
        recipients: json!(["15550000001", {"phone": "15550000002"}]),
        body: "hello".into(),
        media_ref: None,
        pacing_ms: 3000,
        schedule_at: None,
        status,
        sent_count: 0,
        failed_count: 0,
        progress: 0,
        started_at: None,
        completed_at: None,
        last_error: None,
        created_at: Utc::now(),
    }
}

async fn file_store() -> (tempfile::TempDir, SqliteStore) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("bulkwa.db").display());
    let store = SqliteStore::connect(&url).await.unwrap();
    (dir, store)
}

#[tokio::test]
async fn session_upsert_overwrites_previous_row() {
    let (_dir, store) = file_store().await;

    store
        .upsert_session(&SessionRecord::waiting_pairing("acct-1", "2@qr"))
        .await
        .unwrap();
    let row = store.get_session("acct-1").await.unwrap().unwrap();
    assert_eq!(row.status(), SessionStatus::WaitingPairing);
    assert_eq!(row.pairing_code(), Some("2@qr"));

    store
        .upsert_session(&SessionRecord::connected("acct-1", "15551234567"))
        .await
        .unwrap();
    let row = store.get_session("acct-1").await.unwrap().unwrap();
    assert_eq!(row.status(), SessionStatus::Connected);
    assert!(row.pairing_code().is_none());
    assert_eq!(row.identity(), Some("15551234567"));

    assert!(store.get_session("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn campaign_roundtrips_recipients_verbatim() {
    let store = SqliteStore::in_memory().await.unwrap();
    let original = campaign("c1", CampaignStatus::Pending);
    store.insert_campaign(&original).await.unwrap();

    let loaded = store.get_campaign("c1").await.unwrap().unwrap();
    assert_eq!(loaded.recipients, original.recipients);
    assert_eq!(loaded.status, CampaignStatus::Pending);
    assert_eq!(loaded.pacing_ms, 3000);
}

#[tokio::test]
async fn claim_is_exclusive() {
    let store = SqliteStore::in_memory().await.unwrap();
    store
        .insert_campaign(&campaign("c1", CampaignStatus::Pending))
        .await
        .unwrap();

    let first = store.claim_campaign("c1", Utc::now()).await.unwrap();
    assert_eq!(first.unwrap().status, CampaignStatus::Processing);
    assert!(store.claim_campaign("c1", Utc::now()).await.unwrap().is_none());
    assert!(store.claim_campaign("nope", Utc::now()).await.unwrap().is_none());
}

#[tokio::test]
async fn release_keeps_counts_and_started_at() {
    let store = SqliteStore::in_memory().await.unwrap();
    store
        .insert_campaign(&campaign("c1", CampaignStatus::Pending))
        .await
        .unwrap();
    let claimed = store
        .claim_campaign("c1", Utc::now())
        .await
        .unwrap()
        .unwrap();
    let started = claimed.started_at.unwrap();

    store.record_progress("c1", 1, 0, 50).await.unwrap();
    store.release_campaign("c1").await.unwrap();

    let reclaimed = store
        .claim_campaign("c1", Utc::now() + Duration::minutes(5))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reclaimed.sent_count, 1);
    assert_eq!(reclaimed.attempted(), 1);
    assert_eq!(reclaimed.started_at.unwrap(), started);
}

#[tokio::test]
async fn pending_and_due_queries_are_bounded() {
    let store = SqliteStore::in_memory().await.unwrap();
    for i in 0..12 {
        store
            .insert_campaign(&campaign(&format!("p{i}"), CampaignStatus::Pending))
            .await
            .unwrap();
    }
    let mut later = campaign("s-later", CampaignStatus::Scheduled);
    later.schedule_at = Some(Utc::now() + Duration::minutes(5));
    store.insert_campaign(&later).await.unwrap();
    let mut due = campaign("s-due", CampaignStatus::Scheduled);
    due.schedule_at = Some(Utc::now() - Duration::seconds(1));
    store.insert_campaign(&due).await.unwrap();

    assert_eq!(store.list_pending(10).await.unwrap().len(), 10);
    let due_now = store.list_due_scheduled(Utc::now(), 10).await.unwrap();
    assert_eq!(due_now.len(), 1);
    assert_eq!(due_now[0].id, "s-due");
}

#[tokio::test]
async fn terminal_writes() {
    let store = SqliteStore::in_memory().await.unwrap();
    store
        .insert_campaign(&campaign("ok", CampaignStatus::Processing))
        .await
        .unwrap();
    store
        .insert_campaign(&campaign("bad", CampaignStatus::Processing))
        .await
        .unwrap();

    store
        .complete_campaign("ok", 1, 1, 100, Utc::now())
        .await
        .unwrap();
    store
        .fail_campaign("bad", "WhatsApp not connected", Utc::now())
        .await
        .unwrap();

    let ok = store.get_campaign("ok").await.unwrap().unwrap();
    assert_eq!(ok.status, CampaignStatus::Completed);
    assert_eq!((ok.sent_count, ok.failed_count, ok.progress), (1, 1, 100));
    assert!(ok.completed_at.is_some());

    let bad = store.get_campaign("bad").await.unwrap().unwrap();
    assert_eq!(bad.status, CampaignStatus::Failed);
    assert_eq!(bad.last_error.as_deref(), Some("WhatsApp not connected"));
}

#[tokio::test]
async fn requeue_interrupted_only_touches_processing() {
    let store = SqliteStore::in_memory().await.unwrap();
    store
        .insert_campaign(&campaign("a", CampaignStatus::Processing))
        .await
        .unwrap();
    store
        .insert_campaign(&campaign("b", CampaignStatus::Completed))
        .await
        .unwrap();

    assert_eq!(store.requeue_interrupted().await.unwrap(), 1);
    let a = store.get_campaign("a").await.unwrap().unwrap();
    let b = store.get_campaign("b").await.unwrap().unwrap();
    assert_eq!(a.status, CampaignStatus::Pending);
    assert_eq!(b.status, CampaignStatus::Completed);
}

#[tokio::test]
async fn heartbeat_row_is_single() {
    let store = SqliteStore::in_memory().await.unwrap();
    assert!(store.last_heartbeat().await.unwrap().is_none());

    store.record_heartbeat(&Heartbeat::alive(2)).await.unwrap();
    store.record_heartbeat(&Heartbeat::alive(5)).await.unwrap();

    let hb = store.last_heartbeat().await.unwrap().unwrap();
    assert_eq!(hb.status, "alive");
    assert_eq!(hb.active_sessions, 5);
}

#[tokio::test]
async fn memory_store_outage_and_history() {
    let store = MemoryStore::new();
    store
        .upsert_session(&SessionRecord::initializing("acct-1"))
        .await
        .unwrap();
    store
        .upsert_session(&SessionRecord::connected("acct-1", "1555"))
        .await
        .unwrap();
    assert_eq!(
        store.session_history("acct-1").await,
        vec![SessionStatus::Initializing, SessionStatus::Connected]
    );

    store.set_unavailable(true);
    assert!(store.get_session("acct-1").await.is_err());
    store.set_unavailable(false);
    assert!(store.get_session("acct-1").await.unwrap().is_some());
}

async fn assert_duplicate_insert_rejected(store: &dyn CampaignStore) {
    store
        .insert_campaign(&campaign("dup", CampaignStatus::Pending))
        .await
        .unwrap();
    store.claim_campaign("dup", Utc::now()).await.unwrap();
    store.record_progress("dup", 2, 0, 66).await.unwrap();

    let mut replacement = campaign("dup", CampaignStatus::Pending);
    replacement.recipients = json!(["9"]);
    let err = store.insert_campaign(&replacement).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict { .. }), "{err}");

    let kept = store.get_campaign("dup").await.unwrap().unwrap();
    assert_eq!(kept.status, CampaignStatus::Processing);
    assert_eq!(kept.sent_count, 2);
    assert_ne!(kept.recipients, json!(["9"]));
}

#[tokio::test]
async fn duplicate_campaign_id_is_a_conflict() {
    let sqlite = SqliteStore::in_memory().await.unwrap();
    assert_duplicate_insert_rejected(&sqlite).await;
    assert_duplicate_insert_rejected(&MemoryStore::new()).await;
}
