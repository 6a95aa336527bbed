use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use split_session::{config, SessionEvent, SessionManager, SessionState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    let env_file_path = dotenvy::dotenv().ok();

    let config = config::load_config().await?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_filter.as_str().into()))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    info!(version = split_session::VERSION, "Split session client starting");

    match env_file_path {
        Some(path) => info!("Loaded environment variables from {}", path.display()),
        None => debug!("No .env file found. Using existing environment variables."),
    };

    let manager = SessionManager::from_config(&config)?;
    let mut events = manager.subscribe();

    let watcher = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::SignedOut { reason }) => {
                    warn!(reason = ?reason, "Session ended, sign in again to continue")
                }
                Ok(event) => info!(event = ?event, "Session event"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Session events dropped"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    match manager.initialize().await {
        SessionState::Absent => info!(
            storage = %config.storage_path.display(),
            "No active session, waiting for a sign-in"
        ),
        state => info!(state = ?state, "Session restored, refresh is scheduled"),
    }

    info!("Press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // the persisted session survives shutdown; only the timer goes away
    drop(manager);
    watcher.abort();

    info!("Shutdown complete");
    Ok(())
}
