use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::adapters::{HttpClient, SimpleHttpResponse};
use crate::error::{SessionError, SessionResult};
use crate::session::SessionData;

/// Route returning the current access token
pub const GET_TOKEN_PATH: &str = "/api/auth/get-token";
/// Route exchanging the refresh credential for a new session
pub const REFRESH_PATH: &str = "/api/auth/refresh";

/// Something that can produce a fresh access token
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self) -> SessionResult<String>;
}

/// Something that can renew the whole session
#[async_trait]
pub trait SessionRefresher: Send + Sync {
    async fn refresh_session(&self) -> SessionResult<SessionData>;
}

/// Body of `GET /api/auth/get-token`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
}

/// Body of `POST /api/auth/refresh`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    #[serde(default)]
    pub user: Value,
    /// Lifetime of the new token in seconds
    pub expires_in: u64,
}

impl RefreshResponse {
    /// Turn the response into a session anchored at the current time
    pub fn into_session(self) -> SessionData {
        SessionData::expiring_in(self.access_token, self.user, Duration::from_secs(self.expires_in))
    }
}

/// Client for the `/api/auth/*` route handlers
#[derive(Clone)]
pub struct AuthApi {
    http: Arc<dyn HttpClient>,
    base_url: String,
}

impl AuthApi {
    pub fn new(http: Arc<dyn HttpClient>, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Join a route onto the base URL
    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Fetch the current access token
    pub async fn get_token(&self) -> SessionResult<String> {
        let url = self.url(GET_TOKEN_PATH);
        debug!(url = %url, "Requesting access token");

        let response = self.http.get(&url, accept_json()).await?;
        check_auth_response(&response, "token")?;

        let body: TokenResponse = response.json()?;
        match body.access_token {
            Some(token) if !token.is_empty() => Ok(token),
            _ => {
                warn!("Token endpoint answered without an access token");
                Err(SessionError::MissingToken)
            }
        }
    }

    /// Renew the session
    pub async fn refresh(&self) -> SessionResult<SessionData> {
        let url = self.url(REFRESH_PATH);
        debug!(url = %url, "Refreshing session");

        let mut headers = accept_json();
        headers.insert("content-type".to_string(), "application/json".to_string());
        let response = self.http.post(&url, headers, "{}".to_string()).await?;
        check_auth_response(&response, "refresh")?;

        let body: RefreshResponse = response.json()?;
        if body.access_token.is_empty() {
            return Err(SessionError::MissingToken);
        }
        Ok(body.into_session())
    }
}

fn accept_json() -> HashMap<String, String> {
    let mut headers = HashMap::new();
    headers.insert("accept".to_string(), "application/json".to_string());
    headers
}

fn check_auth_response(response: &SimpleHttpResponse, endpoint: &str) -> SessionResult<()> {
    if response.is_unauthorized() {
        debug!(endpoint, "Auth endpoint rejected the session");
        return Err(SessionError::unauthorized(format!("{} endpoint returned 401", endpoint)));
    }
    if !response.is_success() {
        return Err(SessionError::Api {
            status: response.status(),
            body: response.body().to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl TokenSource for AuthApi {
    async fn fetch_token(&self) -> SessionResult<String> {
        self.get_token().await
    }
}

#[async_trait]
impl SessionRefresher for AuthApi {
    async fn refresh_session(&self) -> SessionResult<SessionData> {
        self.refresh().await
    }
}

impl std::fmt::Debug for AuthApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthApi").field("base_url", &self.base_url).finish()
    }
}
