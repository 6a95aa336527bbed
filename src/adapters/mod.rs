//! Adapters to the outside world.

pub mod http_client;

pub use http_client::{HttpClient, HttpMethod, HttpRequest, ReqwestHttpClient, SimpleHttpResponse};
