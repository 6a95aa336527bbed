use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// Default capacity of the session event channel
pub const SESSION_EVENT_CAPACITY: usize = 64;

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignOutReason {
    /// The user logged out
    UserRequested,
    /// The stored session was past its expiry
    Expired,
    /// The silent refresh failed
    RefreshFailed,
    /// The backend kept rejecting our credentials
    Unauthorized,
}

/// Session lifecycle notifications.
///
/// Hosts subscribe to these to drive navigation: `SignedOut` is the cue to
/// redirect to sign-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    SignedIn { expires_at: i64 },
    /// A valid session was loaded from storage at start-up
    Restored { expires_at: i64 },
    Refreshed { expires_at: i64 },
    RefreshScheduled { at: DateTime<Utc> },
    SignedOut { reason: SignOutReason },
}

/// Broadcast channel for session events
#[derive(Debug, Clone)]
pub struct SessionEvents {
    sender: broadcast::Sender<SessionEvent>,
}

impl SessionEvents {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Get a receiver to subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Publish an event, returning how many subscribers received it
    pub fn publish(&self, event: SessionEvent) -> usize {
        trace!(event = ?event, "Publishing session event");
        // no subscribers is fine
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new(SESSION_EVENT_CAPACITY)
    }
}
