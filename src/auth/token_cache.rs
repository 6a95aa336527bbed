//! De-duplicated access to the current bearer token.
//!
//! Concurrent callers that find the cache empty share a single in-flight
//! fetch instead of each hitting the token endpoint.

use std::sync::Arc;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::api::TokenSource;
use crate::error::SessionResult;

/// Type alias for the shared in-flight fetch
type InflightFuture = Shared<BoxFuture<'static, SessionResult<String>>>;

#[derive(Default)]
struct CacheState {
    token: Option<String>,
    inflight: Option<InflightFuture>,
    /// Bumped by `clear_cache`; a fetch only settles into the cache if the
    /// generation it started under is still current.
    generation: u64,
}

/// Token cache with single-flight fetching
#[derive(Clone)]
pub struct TokenCache {
    source: Arc<dyn TokenSource>,
    state: Arc<Mutex<CacheState>>,
}

impl TokenCache {
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self {
            source,
            state: Arc::new(Mutex::new(CacheState::default())),
        }
    }

    /// Get the current token, fetching it at most once for all concurrent callers
    pub async fn get_token(&self) -> SessionResult<String> {
        let inflight = {
            let mut state = self.state.lock().await;

            if let Some(token) = &state.token {
                trace!("Token served from cache");
                return Ok(token.clone());
            }

            match &state.inflight {
                Some(fut) => {
                    trace!("Joining in-flight token fetch");
                    fut.clone()
                }
                None => {
                    debug!(generation = state.generation, "Starting token fetch");
                    let fut = self.start_fetch(state.generation);
                    state.inflight = Some(fut.clone());
                    fut
                }
            }
        };

        inflight.await
    }

    fn start_fetch(&self, generation: u64) -> InflightFuture {
        let source = Arc::clone(&self.source);
        let state = Arc::clone(&self.state);

        let fut: BoxFuture<'static, SessionResult<String>> = Box::pin(async move {
            let result = source.fetch_token().await;

            let mut state = state.lock().await;
            if state.generation == generation {
                state.inflight = None;
                match &result {
                    Ok(token) => state.token = Some(token.clone()),
                    Err(e) => debug!(error = %e, "Token fetch failed"),
                }
            } else {
                debug!(
                    started = generation,
                    current = state.generation,
                    "Discarding token fetched before the cache was cleared"
                );
            }

            result
        });

        fut.shared()
    }

    /// The cached token, without fetching
    pub async fn cached(&self) -> Option<String> {
        self.state.lock().await.token.clone()
    }

    /// Whether a fetch is currently in flight
    pub async fn is_fetching(&self) -> bool {
        self.state.lock().await.inflight.is_some()
    }

    /// Drop the cached token and forget any in-flight fetch
    pub async fn clear_cache(&self) {
        let mut state = self.state.lock().await;
        state.token = None;
        state.inflight = None;
        state.generation = state.generation.wrapping_add(1);
        debug!(generation = state.generation, "Token cache cleared");
    }
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache").finish_non_exhaustive()
    }
}
