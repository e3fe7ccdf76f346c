use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod error;
mod extract;
mod middleware;
mod models;
mod routes;
mod state;
mod upstream;
mod videos;

use common::config::AppConfig;
use tokio::net::TcpListener;

use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting generator service");

    let config = AppConfig::load().context("Failed to load configuration")?;

    let app_state = AppState::from_config(&config).context("Failed to build HTTP client")?;
    app_state
        .storage
        .ensure_dirs()
        .await
        .context("Failed to prepare media directory")?;
    info!(
        media_root = %app_state.storage.root().display(),
        media_url = app_state.storage.url_prefix(),
        "Media storage ready"
    );

    // Start the web server
    let app = routes::create_router(app_state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Generator service listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Generator service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
