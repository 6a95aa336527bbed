use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use super::token_cache::TokenCache;
use crate::adapters::{HttpClient, HttpMethod, HttpRequest, SimpleHttpResponse};
use crate::error::{SessionError, SessionResult};
use crate::events::SignOutReason;

/// Receives the hand-off when a request proves the session is gone
#[async_trait]
pub trait SessionTerminator: Send + Sync {
    async fn terminate(&self, reason: SignOutReason);
}

/// Request helper that attaches the bearer token.
///
/// A 401 with a cached token triggers one retry with a freshly fetched
/// token. A second 401, a 401 with nothing cached, or a failure to obtain
/// the fresh token terminates the session.
#[derive(Clone)]
pub struct AuthorizedClient {
    http: Arc<dyn HttpClient>,
    base_url: String,
    tokens: TokenCache,
    terminator: Arc<dyn SessionTerminator>,
}

impl AuthorizedClient {
    pub fn new(
        http: Arc<dyn HttpClient>,
        base_url: impl Into<String>,
        tokens: TokenCache,
        terminator: Arc<dyn SessionTerminator>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
            terminator,
        }
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Send a request with bearer auth and the retry-once policy
    pub async fn send(&self, request: HttpRequest) -> SessionResult<SimpleHttpResponse> {
        let request_id = Uuid::new_v4().to_string();
        let request = request.with_header("x-request-id", request_id.as_str());

        let token = match self.tokens.get_token().await {
            Ok(token) => token,
            Err(e) => return Err(self.fail(e).await),
        };

        let response = self.http.send(with_bearer(request.clone(), &token)).await?;
        if !response.is_unauthorized() {
            return Ok(response);
        }

        if self.tokens.cached().await.is_none() {
            warn!(request_id = %request_id, url = %request.url, "Unauthorized with no cached token");
            return Err(self.terminate_unauthorized().await);
        }

        debug!(request_id = %request_id, url = %request.url, "Unauthorized, retrying once with a fresh token");
        self.tokens.clear_cache().await;

        let fresh = match self.tokens.get_token().await {
            Ok(token) => token,
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "Could not obtain a fresh token");
                self.terminator.terminate(SignOutReason::Unauthorized).await;
                return Err(e);
            }
        };

        let retried = self.http.send(with_bearer(request, &fresh)).await?;
        if retried.is_unauthorized() {
            warn!(request_id = %request_id, "Retry with fresh token was also unauthorized");
            return Err(self.terminate_unauthorized().await);
        }

        Ok(retried)
    }

    async fn fail(&self, error: SessionError) -> SessionError {
        if error.is_auth_failure() {
            self.terminator.terminate(SignOutReason::Unauthorized).await;
        }
        error
    }

    async fn terminate_unauthorized(&self) -> SessionError {
        self.terminator.terminate(SignOutReason::Unauthorized).await;
        SessionError::unauthorized("request rejected after token refresh")
    }

    /// GET a path and decode the JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> SessionResult<T> {
        let request = HttpRequest::new(HttpMethod::GET, self.url(path))
            .with_header("accept", "application/json");
        decode(self.send(request).await?)
    }

    /// POST a JSON body and decode the JSON answer
    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> SessionResult<T> {
        let request = HttpRequest::new(HttpMethod::POST, self.url(path))
            .with_header("accept", "application/json")
            .with_json_body(serde_json::to_string(body)?);
        decode(self.send(request).await?)
    }

    /// PUT a JSON body and decode the JSON answer
    pub async fn put_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> SessionResult<T> {
        let request = HttpRequest::new(HttpMethod::PUT, self.url(path))
            .with_header("accept", "application/json")
            .with_json_body(serde_json::to_string(body)?);
        decode(self.send(request).await?)
    }

    /// DELETE a path, ignoring any body
    pub async fn delete(&self, path: &str) -> SessionResult<()> {
        let request = HttpRequest::new(HttpMethod::DELETE, self.url(path));
        let response = self.send(request).await?;
        ensure_success(&response)
    }
}

fn with_bearer(request: HttpRequest, token: &str) -> HttpRequest {
    request.with_header("authorization", format!("Bearer {}", token))
}

fn ensure_success(response: &SimpleHttpResponse) -> SessionResult<()> {
    if response.is_success() {
        Ok(())
    } else {
        Err(SessionError::Api {
            status: response.status(),
            body: response.body().to_string(),
        })
    }
}

fn decode<T: DeserializeOwned>(response: SimpleHttpResponse) -> SessionResult<T> {
    ensure_success(&response)?;
    response.json()
}

impl std::fmt::Debug for AuthorizedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizedClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
