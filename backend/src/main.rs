//! Main entry point for the MentorLink backend.
//!
//! Loads configuration, sets up logging and the database, then serves the
//! Axum router until interrupted.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use mentorlink_backend::config::{Config, LogFormat};
use mentorlink_backend::database::Database;
use mentorlink_backend::{app, AppState};

#[derive(Debug, Parser)]
#[command(name = "mentorlink", version, about = "Mentor/mentee directory service")]
struct Cli {
    /// Configuration file. Environment variables prefixed `MENTORLINK__` override it.
    #[arg(short, long, env = "MENTORLINK_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref().and_then(|path| path.to_str()))?;

    init_logging(&config);

    let db = Database::connect(&config.database).await?;
    let state = AppState::new(&config, db.clone())?;

    match state.tokens.purge_revocations().await {
        Ok(purged) => tracing::info!(purged, "purged stale revocation records"),
        Err(err) => tracing::warn!(error = %err, "could not purge revocation records"),
    }

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "listening");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    db.close().await;
    tracing::info!("server shutdown complete");
    Ok(())
}

/// `RUST_LOG` wins over the configured filter.
fn init_logging(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.filter));

    match config.log.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().flatten_event(true).with_current_span(false))
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer())
            .init(),
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("shutdown signal received");
}
