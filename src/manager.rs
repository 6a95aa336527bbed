//! Session lifecycle: restore, sign-in, silent refresh and sign-out.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::adapters::{HttpClient, ReqwestHttpClient};
use crate::auth::{AuthApi, AuthorizedClient, SessionRefresher, SessionTerminator, TokenCache};
use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::events::{SessionEvent, SessionEvents, SignOutReason};
use crate::scheduler::RefreshScheduler;
use crate::session::{now_millis, FileStorage, KeyValueStorage, SessionData, SessionState, SessionStore};

struct SessionInner {
    store: SessionStore,
    tokens: TokenCache,
    refresher: Arc<dyn SessionRefresher>,
    http: Arc<dyn HttpClient>,
    base_url: String,
    scheduler: RefreshScheduler,
    events: SessionEvents,
}

/// Owns the persisted session and keeps it alive.
///
/// While a session is held a single refresh timer is pending. A failed
/// refresh signs the user out.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    /// Wire a manager over the given transport and storage
    pub fn new(
        http: Arc<dyn HttpClient>,
        storage: Arc<dyn KeyValueStorage>,
        config: &SessionConfig,
    ) -> Self {
        let api = Arc::new(AuthApi::new(Arc::clone(&http), config.api_base_url.as_str()));
        let tokens = TokenCache::new(api.clone());

        Self::from_parts(
            SessionStore::new(storage, config.session_key.as_str()),
            tokens,
            api.clone(),
            http,
            api.base_url().to_string(),
            RefreshScheduler::new(config.refresh_threshold()),
        )
    }

    /// Build a manager backed by reqwest and the configured storage file
    pub fn from_config(config: &SessionConfig) -> SessionResult<Self> {
        config.validate()?;
        let http = Arc::new(ReqwestHttpClient::with_timeout(config.request_timeout())?);
        let storage = Arc::new(FileStorage::new(config.storage_path.clone()));
        Ok(Self::new(http, storage, config))
    }

    /// Assemble a manager from individually built components
    pub fn from_parts(
        store: SessionStore,
        tokens: TokenCache,
        refresher: Arc<dyn SessionRefresher>,
        http: Arc<dyn HttpClient>,
        base_url: impl Into<String>,
        scheduler: RefreshScheduler,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                store,
                tokens,
                refresher,
                http,
                base_url: base_url.into(),
                scheduler,
                events: SessionEvents::default(),
            }),
        }
    }

    /// Restore the persisted session at start-up.
    ///
    /// A valid session gets its refresh scheduled; an expired one is cleared.
    pub async fn initialize(&self) -> SessionState {
        let Some(session) = self.inner.store.get() else {
            debug!("No stored session");
            return SessionState::Absent;
        };

        let state = self.state_of(Some(&session));
        if state == SessionState::Expired {
            info!(expires_at = session.expires_at, "Stored session has expired");
            self.inner.end_session(SignOutReason::Expired).await;
            return SessionState::Absent;
        }

        info!(expires_at = session.expires_at, state = ?state, "Restored session");
        self.inner.events.publish(SessionEvent::Restored {
            expires_at: session.expires_at,
        });
        self.inner.schedule_refresh(&session).await;
        state
    }

    /// Adopt a freshly issued session
    pub async fn sign_in(&self, session: SessionData) -> SessionResult<()> {
        if !session.is_valid() {
            warn!(expires_at = session.expires_at, "Refusing an already expired session");
            return Err(SessionError::unauthorized("session is already expired"));
        }

        self.inner.store.set(&session);
        self.inner.tokens.clear_cache().await;
        self.inner.scheduler.cancel().await;

        info!(expires_at = session.expires_at, "Signed in");
        self.inner.events.publish(SessionEvent::SignedIn {
            expires_at: session.expires_at,
        });
        self.inner.schedule_refresh(&session).await;
        Ok(())
    }

    /// Refresh now instead of waiting for the timer.
    ///
    /// On failure the session is cleared before the error is returned.
    pub async fn refresh(&self) -> SessionResult<SessionData> {
        Arc::clone(&self.inner).refresh_now().await
    }

    /// Sign out, recording why. Safe to call when already signed out.
    pub async fn logout(&self, reason: SignOutReason) {
        self.inner.end_session(reason).await;
    }

    /// The persisted session, if any
    pub fn session(&self) -> Option<SessionData> {
        self.inner.store.get()
    }

    pub fn state(&self) -> SessionState {
        self.state_of(self.inner.store.get().as_ref())
    }

    pub fn is_authenticated(&self) -> bool {
        self.state().is_authenticated()
    }

    /// The signed-in user decoded as `T`
    pub fn user<T: DeserializeOwned>(&self) -> Option<T> {
        let session = self.inner.store.load_valid()?;
        match session.user_as() {
            Ok(user) => Some(user),
            Err(e) => {
                debug!(error = %e, "Stored user does not match the requested shape");
                None
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn events(&self) -> &SessionEvents {
        &self.inner.events
    }

    pub fn tokens(&self) -> &TokenCache {
        &self.inner.tokens
    }

    /// Whether a refresh timer is pending
    pub async fn refresh_scheduled(&self) -> bool {
        self.inner.scheduler.is_scheduled().await
    }

    /// Client for backend calls that signs this session out when the
    /// backend keeps rejecting it.
    ///
    /// The client does not keep the manager alive.
    pub fn authorized_client(&self) -> AuthorizedClient {
        let terminator: Arc<dyn SessionTerminator> =
            Arc::new(ManagerTerminator(Arc::downgrade(&self.inner)));
        AuthorizedClient::new(
            Arc::clone(&self.inner.http),
            self.inner.base_url.as_str(),
            self.inner.tokens.clone(),
            terminator,
        )
    }

    fn state_of(&self, session: Option<&SessionData>) -> SessionState {
        SessionState::of(session, now_millis(), self.inner.scheduler.threshold())
    }
}

impl SessionInner {
    // Boxed so the timer callback can name this future without a cycle.
    fn refresh_now(self: Arc<Self>) -> BoxFuture<'static, SessionResult<SessionData>> {
        Box::pin(async move {
            let refreshed = self.refresher.refresh_session().await.and_then(|session| {
                if session.is_valid() {
                    Ok(session)
                } else {
                    Err(SessionError::invalid_response(format!(
                        "refreshed session already expired at {}",
                        session.expires_at
                    )))
                }
            });

            match refreshed {
                Ok(session) => {
                    self.store.set(&session);
                    self.tokens.clear_cache().await;
                    self.scheduler.cancel().await;

                    info!(expires_at = session.expires_at, "Session refreshed");
                    self.events.publish(SessionEvent::Refreshed {
                        expires_at: session.expires_at,
                    });

                    let state = session.state_at(now_millis(), self.scheduler.threshold());
                    if state != SessionState::Valid {
                        // refreshing again would return the same short lifetime
                        warn!(
                            expires_at = session.expires_at,
                            "Refreshed session expires inside the refresh threshold"
                        );
                        self.schedule_expiry(&session).await;
                    } else {
                        self.schedule_refresh(&session).await;
                    }
                    Ok(session)
                }
                Err(e) => {
                    warn!(error = %e, "Session refresh failed, signing out");
                    self.end_session(SignOutReason::RefreshFailed).await;
                    Err(e)
                }
            }
        })
    }

    async fn schedule_refresh(self: &Arc<Self>, session: &SessionData) {
        let weak = Arc::downgrade(self);
        let due = self
            .scheduler
            .schedule(session.expires_at, move || async move {
                if let Some(inner) = weak.upgrade() {
                    // failures already ended the session
                    let _ = inner.refresh_now().await;
                }
            })
            .await;

        if let Some(at) = due {
            self.events.publish(SessionEvent::RefreshScheduled { at });
        }
    }

    /// End the session when it expires instead of refreshing it
    async fn schedule_expiry(self: &Arc<Self>, session: &SessionData) {
        let weak = Arc::downgrade(self);
        self.scheduler
            .schedule_ahead(session.expires_at, now_millis(), Duration::ZERO, move || async move {
                if let Some(inner) = weak.upgrade() {
                    info!("Session reached its expiry");
                    inner.end_session(SignOutReason::Expired).await;
                }
            })
            .await;
    }

    async fn end_session(&self, reason: SignOutReason) {
        self.scheduler.cancel().await;
        self.store.clear();
        self.tokens.clear_cache().await;

        info!(reason = ?reason, "Signed out");
        self.events.publish(SessionEvent::SignedOut { reason });
    }
}

/// Terminator that holds the session weakly
struct ManagerTerminator(Weak<SessionInner>);

#[async_trait]
impl SessionTerminator for ManagerTerminator {
    async fn terminate(&self, reason: SignOutReason) {
        match self.0.upgrade() {
            Some(inner) => inner.end_session(reason).await,
            None => debug!(reason = ?reason, "Session manager is gone, nothing to terminate"),
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("store", &self.inner.store)
            .field("base_url", &self.inner.base_url)
            .finish_non_exhaustive()
    }
}
