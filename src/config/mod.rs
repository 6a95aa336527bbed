use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info};

use crate::error::{SessionError, SessionResult};

// Default configuration values
const DEFAULT_API_BASE_URL: &str = "http://localhost:3000";
const DEFAULT_REFRESH_THRESHOLD_SECONDS: u64 = 300;
const DEFAULT_STORAGE_PATH: &str = "split-session.store.json";
const DEFAULT_SESSION_KEY: &str = "split_money_session";
const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_LOG_FILTER: &str = "split_session=info,warn";
const DEFAULT_CONFIG_FILENAME: &str = "split-session.json";

/// Configuration for the session client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// Base URL the `/api/auth/*` and backend routes hang off
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Lead time before expiry at which the silent refresh fires
    #[serde(default = "default_refresh_threshold")]
    pub refresh_threshold_secs: u64,
    /// File backing the persistent key-value storage
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,
    /// Storage slot holding the session blob
    #[serde(default = "default_session_key")]
    pub session_key: String,
    /// Per-request timeout for the HTTP client
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Fallback tracing filter when RUST_LOG is unset
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl SessionConfig {
    /// Refresh lead time as a `Duration`
    pub fn refresh_threshold(&self) -> Duration {
        Duration::from_secs(self.refresh_threshold_secs)
    }

    /// Request timeout as a `Duration`
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Check the values that would otherwise fail late
    pub fn validate(&self) -> SessionResult<()> {
        if !(self.api_base_url.starts_with("http://") || self.api_base_url.starts_with("https://")) {
            return Err(SessionError::Config(format!(
                "api_base_url must be an http(s) URL, got '{}'",
                self.api_base_url
            )));
        }
        if self.session_key.trim().is_empty() {
            return Err(SessionError::Config("session_key must not be empty".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(SessionError::Config(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// Default functions
fn default_api_base_url() -> String {
    std::env::var("SPLIT_API_BASE_URL").unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string())
}

fn default_refresh_threshold() -> u64 {
    std::env::var("SPLIT_REFRESH_THRESHOLD_SECS")
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(DEFAULT_REFRESH_THRESHOLD_SECONDS)
}

fn default_storage_path() -> PathBuf {
    std::env::var("SPLIT_STORAGE_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_STORAGE_PATH))
}

fn default_session_key() -> String {
    std::env::var("SPLIT_SESSION_KEY").unwrap_or_else(|_| DEFAULT_SESSION_KEY.to_string())
}

fn default_request_timeout() -> u64 {
    std::env::var("SPLIT_REQUEST_TIMEOUT_SECS")
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECONDS)
}

fn default_log_filter() -> String {
    std::env::var("SPLIT_LOG_FILTER").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string())
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            refresh_threshold_secs: default_refresh_threshold(),
            storage_path: default_storage_path(),
            session_key: default_session_key(),
            request_timeout_secs: default_request_timeout(),
            log_filter: default_log_filter(),
        }
    }
}

/// Load the configuration from `SPLIT_CONFIG_PATH` or the working directory
pub async fn load_config() -> SessionResult<SessionConfig> {
    let path = get_config_path();
    let config = load_or_create_config(&path).await?;
    config.validate()?;
    Ok(config)
}

/// Get the path to the configuration file
fn get_config_path() -> PathBuf {
    std::env::var("SPLIT_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILENAME))
}

/// Load configuration from file or create default
pub async fn load_or_create_config(path: &Path) -> SessionResult<SessionConfig> {
    if !fs::try_exists(path).await? {
        let default_config = SessionConfig::default();
        save_config(path, &default_config).await?;
        info!("Created default configuration at {}", path.display());
        return Ok(default_config);
    }

    let config_str = fs::read_to_string(path).await?;
    let config: SessionConfig = serde_json::from_str(&config_str)
        .map_err(|e| SessionError::Config(format!("{}: {}", path.display(), e)))?;
    debug!("Loaded configuration from {}", path.display());

    Ok(config)
}

/// Save configuration to file
pub async fn save_config(path: &Path, config: &SessionConfig) -> SessionResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    let config_str = serde_json::to_string_pretty(config)?;
    fs::write(path, config_str).await?;
    debug!("Saved configuration to {}", path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{ "api_base_url": "https://split.example" }"#).unwrap();
        assert_eq!(config.api_base_url, "https://split.example");
        assert!(!config.session_key.is_empty());
        assert!(config.request_timeout_secs > 0);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = SessionConfig {
            api_base_url: "ftp://nope".into(),
            ..SessionConfig::default()
        };
        assert!(matches!(config.validate(), Err(SessionError::Config(_))));

        config.api_base_url = "https://split.example".into();
        config.session_key = "  ".into();
        assert!(config.validate().is_err());

        config.session_key = "s".into();
        config.request_timeout_secs = 0;
        assert!(config.validate().is_err());

        config.request_timeout_secs = 5;
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let created = load_or_create_config(&path).await.unwrap();
        assert!(path.exists());

        let reloaded = load_or_create_config(&path).await.unwrap();
        assert_eq!(created, reloaded);
    }

    #[tokio::test]
    async fn test_load_rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ broken").unwrap();

        let result = load_or_create_config(&path).await;
        assert!(matches!(result, Err(SessionError::Config(_))));
    }
}
