use std::fmt;
use thiserror::Error;

/// Main error type for session and token operations.
///
/// Variants only carry owned strings so the error is `Clone`: a single
/// in-flight token fetch hands the same result to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The auth endpoint or a backend call answered 401
    #[error("Not authenticated: {0}")]
    Unauthorized(String),

    /// The token endpoint answered 2xx without a usable token
    #[error("Token endpoint returned no access token")]
    MissingToken,

    /// Transport failure (connect, timeout, TLS, ...)
    #[error("Network error: {0}")]
    Network(String),

    /// Backend answered with a non-success status other than 401
    #[error("API request failed with status {status}: {body}")]
    Api {
        status: u16,
        body: String,
    },

    /// Response body did not have the expected shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Persistent storage could not be read or written
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Type alias for session results
pub type SessionResult<T> = Result<T, SessionError>;

/// Stable error codes for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    AuthUnauthorized,
    AuthMissingToken,
    NetworkFailure,
    ApiRequestFailed,
    ApiResponseInvalid,
    StorageFailed,
    SerializationFailed,
    ConfigInvalid,
    Internal,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code_str = match self {
            ErrorCode::AuthUnauthorized => "AUTH_UNAUTHORIZED",
            ErrorCode::AuthMissingToken => "AUTH_MISSING_TOKEN",
            ErrorCode::NetworkFailure => "NETWORK_FAILURE",
            ErrorCode::ApiRequestFailed => "API_REQUEST_FAILED",
            ErrorCode::ApiResponseInvalid => "API_RESPONSE_INVALID",
            ErrorCode::StorageFailed => "STORAGE_FAILED",
            ErrorCode::SerializationFailed => "SERIALIZATION_FAILED",
            ErrorCode::ConfigInvalid => "CONFIG_INVALID",
            ErrorCode::Internal => "INTERNAL",
        };
        write!(f, "{}", code_str)
    }
}

impl SessionError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            SessionError::Unauthorized(_) => ErrorCode::AuthUnauthorized,
            SessionError::MissingToken => ErrorCode::AuthMissingToken,
            SessionError::Network(_) => ErrorCode::NetworkFailure,
            SessionError::Api { .. } => ErrorCode::ApiRequestFailed,
            SessionError::InvalidResponse(_) => ErrorCode::ApiResponseInvalid,
            SessionError::Storage(_) => ErrorCode::StorageFailed,
            SessionError::Serialization(_) => ErrorCode::SerializationFailed,
            SessionError::Config(_) => ErrorCode::ConfigInvalid,
            SessionError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// True when the caller should treat the session as gone and send the
    /// user back to sign-in.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, SessionError::Unauthorized(_) | SessionError::MissingToken)
    }

    /// Create an unauthorized error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        SessionError::Unauthorized(message.into())
    }

    /// Create a storage error
    pub fn storage(message: impl fmt::Display) -> Self {
        SessionError::Storage(message.to_string())
    }

    /// Create an invalid response error
    pub fn invalid_response(message: impl fmt::Display) -> Self {
        SessionError::InvalidResponse(message.to_string())
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        SessionError::Network(err.to_string())
    }
}
