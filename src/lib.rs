pub mod adapters;
pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod scheduler;
pub mod session;

// Re-export core components
pub use crate::adapters::{HttpClient, HttpMethod, HttpRequest, ReqwestHttpClient, SimpleHttpResponse};
pub use crate::auth::{AuthApi, AuthorizedClient, TokenCache};
pub use crate::config::SessionConfig;
pub use crate::error::{ErrorCode, SessionError, SessionResult};
pub use crate::events::{SessionEvent, SessionEvents, SignOutReason};
pub use crate::manager::SessionManager;
pub use crate::scheduler::{refresh_delay, RefreshScheduler};
pub use crate::session::{FileStorage, KeyValueStorage, MemoryStorage, SessionData, SessionState, SessionStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
