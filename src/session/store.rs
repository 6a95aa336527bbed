use std::sync::Arc;

use tracing::{debug, info, warn};

use super::storage::KeyValueStorage;
use super::{now_millis, SessionData};

/// Reads and writes the single persisted session slot.
///
/// Storage failures never escape: a broken or unreadable slot is logged and
/// reported as "no session".
#[derive(Clone)]
pub struct SessionStore {
    storage: Arc<dyn KeyValueStorage>,
    key: String,
}

impl SessionStore {
    /// Create a store over `storage` using slot `key`
    pub fn new(storage: Arc<dyn KeyValueStorage>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Get the persisted session, if any
    pub fn get(&self) -> Option<SessionData> {
        let raw = match self.storage.get_item(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %self.key, error = %e, "Failed to read session from storage");
                return None;
            }
        };

        match serde_json::from_str::<SessionData>(&raw) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(key = %self.key, error = %e, "Stored session is malformed, ignoring it");
                None
            }
        }
    }

    /// Overwrite the persisted session
    pub fn set(&self, session: &SessionData) {
        let raw = match serde_json::to_string(session) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %self.key, error = %e, "Failed to serialize session");
                return;
            }
        };

        match self.storage.set_item(&self.key, &raw) {
            Ok(()) => debug!(key = %self.key, expires_at = session.expires_at, "Session persisted"),
            Err(e) => warn!(key = %self.key, error = %e, "Failed to persist session"),
        }
    }

    /// Remove the persisted session
    pub fn clear(&self) {
        match self.storage.remove_item(&self.key) {
            Ok(()) => debug!(key = %self.key, "Session cleared from storage"),
            Err(e) => warn!(key = %self.key, error = %e, "Failed to clear session from storage"),
        }
    }

    /// True iff a session is present and not yet expired
    pub fn is_valid(session: Option<&SessionData>) -> bool {
        session.is_some_and(|s| s.expires_at > now_millis())
    }

    /// Load the session only if it is still valid, clearing an expired one
    pub fn load_valid(&self) -> Option<SessionData> {
        let session = self.get()?;
        if Self::is_valid(Some(&session)) {
            Some(session)
        } else {
            info!(
                key = %self.key,
                expires_at = session.expires_at,
                "Stored session has expired, clearing it"
            );
            self.clear();
            None
        }
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore").field("key", &self.key).finish()
    }
}
