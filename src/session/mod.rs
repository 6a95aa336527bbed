//! Client-held authentication state and its persistence.

pub mod storage;
pub mod store;

use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use storage::{FileStorage, KeyValueStorage, MemoryStorage};
pub use store::SessionStore;

/// Current wall-clock time as unix milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// The persisted session record.
///
/// Stored as `{ "accessToken": ..., "user": ..., "expiresAt": <ms> }`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    /// Bearer token for backend calls
    pub access_token: String,
    /// Opaque user profile as returned by the auth endpoints
    pub user: Value,
    /// Expiry as unix milliseconds
    pub expires_at: i64,
}

impl SessionData {
    pub fn new(access_token: impl Into<String>, user: Value, expires_at: i64) -> Self {
        Self {
            access_token: access_token.into(),
            user,
            expires_at,
        }
    }

    /// Build a session that expires `expires_in` from now
    pub fn expiring_in(access_token: impl Into<String>, user: Value, expires_in: Duration) -> Self {
        let expires_in_ms = i64::try_from(expires_in.as_millis()).unwrap_or(i64::MAX);
        let expires_at = now_millis().saturating_add(expires_in_ms);
        Self::new(access_token, user, expires_at)
    }

    /// Check if the session is still valid
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(now_millis())
    }

    pub fn is_valid_at(&self, now_ms: i64) -> bool {
        self.expires_at > now_ms
    }

    /// Milliseconds left before expiry, negative once expired
    pub fn remaining_millis(&self, now_ms: i64) -> i64 {
        self.expires_at.saturating_sub(now_ms)
    }

    /// Classify the session against a refresh threshold
    pub fn state_at(&self, now_ms: i64, threshold: Duration) -> SessionState {
        let remaining = self.remaining_millis(now_ms);
        if remaining <= 0 {
            SessionState::Expired
        } else if remaining <= i64::try_from(threshold.as_millis()).unwrap_or(i64::MAX) {
            SessionState::ExpiringSoon
        } else {
            SessionState::Valid
        }
    }

    /// Deserialize the opaque user blob into a concrete type
    pub fn user_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.user.clone())
    }
}

/// Where a session sits in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Nobody is signed in
    Absent,
    /// Signed in with time to spare
    Valid,
    /// Inside the refresh threshold, a silent refresh is due
    ExpiringSoon,
    /// Past expiry, must be cleared
    Expired,
}

impl SessionState {
    /// Classify an optional session; no session means `Absent`
    pub fn of(session: Option<&SessionData>, now_ms: i64, threshold: Duration) -> Self {
        match session {
            Some(session) => session.state_at(now_ms, threshold),
            None => SessionState::Absent,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Valid | SessionState::ExpiringSoon)
    }
}
