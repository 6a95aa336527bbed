pub mod api;
pub mod authorized;
pub mod token_cache;

pub use api::{AuthApi, RefreshResponse, SessionRefresher, TokenResponse, TokenSource};
pub use authorized::{AuthorizedClient, SessionTerminator};
pub use token_cache::TokenCache;
