//! Muda Server
//!
//! A self-hosted home file server with resumable chunked uploads and
//! two-way folder sync.

use std::net::SocketAddr;

use anyhow::Context;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use muda_server::config::Config;
use muda_server::state::AppState;
use muda_server::sweeper::RetentionSweeper;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "muda_server=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("Failed to load configuration")?;

    tracing::info!("Starting Muda Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Data directory: {}", config.storage.data_dir.display());
    tracing::info!("Fingerprint algorithm: {}", config.sync.hash_algorithm);

    tokio::fs::create_dir_all(&config.storage.data_dir)
        .await
        .with_context(|| format!("Failed to create data directory {}", config.storage.data_dir.display()))?;

    // Create application state
    let state = AppState::new(config.clone());

    // Start retention sweeper
    let sweeper = RetentionSweeper::new(&config.storage.data_dir, state.assembler().clone())
        .with_chunk_max_age(config.cleanup.chunk_max_age())
        .with_progress_max_age(config.cleanup.progress_max_age())
        .with_interval(config.cleanup.interval())
        .start();
    tracing::info!(
        interval_hours = config.cleanup.interval_hours,
        chunk_max_age_hours = config.cleanup.chunk_max_age_hours,
        "Retention sweeper started"
    );

    let app = muda_server::app(state.clone());

    // Start server with graceful shutdown
    let host: std::net::IpAddr = config
        .server
        .host
        .parse()
        .with_context(|| format!("Invalid SERVER_HOST: {}", config.server.host))?;
    let addr = SocketAddr::from((host, config.server.port));
    tracing::info!("Muda Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    sweeper.shutdown().await;
    state.progress().clear();

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
