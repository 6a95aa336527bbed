//! Shared setup for the integration tests

use std::sync::Arc;

use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::json;

use split_session::session::now_millis;
use split_session::{KeyValueStorage, MemoryStorage, ReqwestHttpClient, SessionConfig, SessionData, SessionManager};

pub const GET_TOKEN_PATH: &str = "/api/auth/get-token";
pub const REFRESH_PATH: &str = "/api/auth/refresh";

/// A mock backend plus a manager pointed at it
pub struct TestHarness {
    pub server: ServerGuard,
    pub config: SessionConfig,
}

impl TestHarness {
    pub async fn new() -> Self {
        let server = Server::new_async().await;
        let config = SessionConfig {
            api_base_url: server.url(),
            refresh_threshold_secs: 300,
            session_key: "split_money_session".to_string(),
            request_timeout_secs: 5,
            ..SessionConfig::default()
        };
        Self { server, config }
    }

    /// A manager over in-memory storage
    pub fn manager(&self) -> SessionManager {
        self.manager_with(Arc::new(MemoryStorage::new()))
    }

    pub fn manager_with(&self, storage: Arc<dyn KeyValueStorage>) -> SessionManager {
        SessionManager::new(Arc::new(ReqwestHttpClient::new()), storage, &self.config)
    }

    /// Token endpoint answering `token`, expected `hits` times
    pub async fn mock_token(&mut self, token: &str, hits: usize) -> Mock {
        self.server
            .mock("GET", GET_TOKEN_PATH)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "accessToken": token }).to_string())
            .expect(hits)
            .create_async()
            .await
    }

    /// Backend route that only answers callers presenting `token`
    pub async fn mock_route_for_token(
        &mut self,
        method: &str,
        path: &str,
        token: &str,
        status: usize,
        body: &str,
        hits: usize,
    ) -> Mock {
        self.server
            .mock(method, path)
            .match_header("authorization", format!("Bearer {}", token).as_str())
            .match_header("x-request-id", Matcher::Any)
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body)
            .expect(hits)
            .create_async()
            .await
    }
}

/// A session expiring `minutes` from now
pub fn session_expiring_in(minutes: i64) -> SessionData {
    SessionData::new(
        "signed-in",
        json!({ "id": "u1", "email": "ana@example.com" }),
        now_millis() + minutes * 60_000,
    )
}
