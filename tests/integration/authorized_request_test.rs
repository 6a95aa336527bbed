//! Bearer auth and the retry-once policy over real HTTP

use anyhow::Result;
use futures::future::join_all;
use serde_json::{json, Value};

use split_session::{SessionEvent, SignOutReason};

use super::test_harness::{session_expiring_in, TestHarness};

#[tokio::test]
async fn test_concurrent_requests_share_one_token_fetch() -> Result<()> {
    let mut harness = TestHarness::new().await;
    let token = harness.mock_token("abc", 1).await;
    let route = harness
        .mock_route_for_token("GET", "/api/transactions", "abc", 200, "[]", 3)
        .await;

    let manager = harness.manager();
    manager.sign_in(session_expiring_in(60)).await?;
    let client = manager.authorized_client();

    let results: Vec<split_session::SessionResult<Value>> =
        join_all((0..3).map(|_| client.get_json("/api/transactions"))).await;
    for result in results {
        assert_eq!(result?, json!([]));
    }

    token.assert_async().await;
    route.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn test_unauthorized_retries_once_with_fresh_token() -> Result<()> {
    let mut harness = TestHarness::new().await;
    let old_token = harness.mock_token("old", 1).await;
    let new_token = harness.mock_token("new", 1).await;
    let rejected = harness
        .mock_route_for_token("POST", "/api/tags", "old", 401, "{}", 1)
        .await;
    let accepted = harness
        .mock_route_for_token("POST", "/api/tags", "new", 201, r#"{"id":"t1"}"#, 1)
        .await;

    let manager = harness.manager();
    manager.sign_in(session_expiring_in(60)).await?;

    let created: Value = manager
        .authorized_client()
        .post_json("/api/tags", &json!({ "name": "groceries" }))
        .await?;
    assert_eq!(created, json!({ "id": "t1" }));
    assert!(manager.session().is_some());

    old_token.assert_async().await;
    new_token.assert_async().await;
    rejected.assert_async().await;
    accepted.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn test_second_unauthorized_signs_out() -> Result<()> {
    let mut harness = TestHarness::new().await;
    let token = harness.mock_token("abc", 2).await;
    let route = harness
        .mock_route_for_token("GET", "/api/transactions", "abc", 401, "{}", 2)
        .await;

    let manager = harness.manager();
    manager.sign_in(session_expiring_in(60)).await?;
    let mut events = manager.subscribe();

    let result: split_session::SessionResult<Value> =
        manager.authorized_client().get_json("/api/transactions").await;

    assert!(result.unwrap_err().is_auth_failure());
    assert_eq!(manager.session(), None);
    assert_eq!(
        events.recv().await?,
        SessionEvent::SignedOut { reason: SignOutReason::Unauthorized }
    );

    token.assert_async().await;
    route.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn test_server_errors_do_not_sign_out() -> Result<()> {
    let mut harness = TestHarness::new().await;
    let _token = harness.mock_token("abc", 1).await;
    let _route = harness
        .mock_route_for_token("GET", "/api/transactions", "abc", 500, "boom", 1)
        .await;

    let manager = harness.manager();
    manager.sign_in(session_expiring_in(60)).await?;

    let result: split_session::SessionResult<Value> =
        manager.authorized_client().get_json("/api/transactions").await;

    assert_eq!(
        result.unwrap_err(),
        split_session::SessionError::Api { status: 500, body: "boom".into() }
    );
    assert!(manager.session().is_some());
    Ok(())
}
