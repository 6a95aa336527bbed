//! Restore, refresh and sign-out against real storage and HTTP

use std::sync::Arc;

use anyhow::Result;
use mockito::Matcher;
use serde_json::json;

use split_session::session::now_millis;
use split_session::{FileStorage, KeyValueStorage, SessionData, SessionEvent, SessionState, SignOutReason};

use super::test_harness::{session_expiring_in, TestHarness, REFRESH_PATH};

#[tokio::test]
async fn test_session_survives_restart_in_file_storage() -> Result<()> {
    let harness = TestHarness::new().await;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("store.json");
    let session = session_expiring_in(60);

    {
        let manager = harness.manager_with(Arc::new(FileStorage::new(&path)));
        manager.sign_in(session.clone()).await?;
    }

    let manager = harness.manager_with(Arc::new(FileStorage::new(&path)));
    let mut events = manager.subscribe();
    assert_eq!(manager.initialize().await, SessionState::Valid);
    assert_eq!(manager.session(), Some(session.clone()));
    assert!(manager.refresh_scheduled().await);

    assert_eq!(events.recv().await?, SessionEvent::Restored { expires_at: session.expires_at });
    assert!(matches!(events.recv().await?, SessionEvent::RefreshScheduled { .. }));
    Ok(())
}

#[tokio::test]
async fn test_expired_file_session_is_cleared_on_start() -> Result<()> {
    let harness = TestHarness::new().await;
    let dir = tempfile::tempdir()?;
    let storage = Arc::new(FileStorage::new(dir.path().join("store.json")));
    let stale = SessionData::new("abc", json!({ "id": "u1" }), now_millis() - 1000);
    storage.set_item(&harness.config.session_key, &serde_json::to_string(&stale)?)?;

    let manager = harness.manager_with(storage.clone());
    let mut events = manager.subscribe();

    assert_eq!(manager.initialize().await, SessionState::Absent);
    assert_eq!(storage.get_item(&harness.config.session_key)?, None);
    assert_eq!(
        events.recv().await?,
        SessionEvent::SignedOut { reason: SignOutReason::Expired }
    );
    Ok(())
}

#[tokio::test]
async fn test_refresh_posts_and_stores_new_session() -> Result<()> {
    let mut harness = TestHarness::new().await;
    let refresh = harness
        .server
        .mock("POST", REFRESH_PATH)
        .match_header("content-type", "application/json")
        .match_body(Matcher::Json(json!({})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({ "accessToken": "renewed", "user": { "id": "u1" }, "expiresIn": 3600 }).to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let manager = harness.manager();
    manager.sign_in(session_expiring_in(60)).await?;
    let before = now_millis();

    let session = manager.refresh().await?;
    assert_eq!(session.access_token, "renewed");
    assert!(session.expires_at >= before + 3_600_000);
    assert_eq!(manager.session(), Some(session));

    refresh.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn test_rejected_refresh_signs_out() -> Result<()> {
    let mut harness = TestHarness::new().await;
    let _refresh = harness
        .server
        .mock("POST", REFRESH_PATH)
        .with_status(401)
        .create_async()
        .await;

    let manager = harness.manager();
    manager.sign_in(session_expiring_in(60)).await?;
    let mut events = manager.subscribe();

    assert!(manager.refresh().await.unwrap_err().is_auth_failure());
    assert_eq!(manager.state(), SessionState::Absent);
    assert_eq!(
        events.recv().await?,
        SessionEvent::SignedOut { reason: SignOutReason::RefreshFailed }
    );
    Ok(())
}
