//! Outbox Relay binary entry point

use outbox_relay::{
    AppState,
    config::{self, LogFormat},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application entry point
///
/// # Setup
/// 1. Load configuration from file and environment
/// 2. Initialize tracing/logging from the `logging` section
/// 3. Initialize AppState (database, pool sizing, worker pool)
/// 4. Serve health, metrics and admin endpoints
/// 5. On Ctrl-C, stop the server and drain the worker pool
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::AppConfig::load()?;

    let filter = config.logging.env_filter();
    match config.logging.log_format() {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init(),
    }

    tracing::info!("Starting Outbox Relay...");

    outbox_relay::metrics::init_metrics();

    tracing::info!(
        database = %config.database.path.display(),
        pool_size = ?config.delivery.pool_size,
        "Configuration loaded"
    );

    let state = AppState::new(config.clone()).await?;
    let app = outbox_relay::build_router(state.clone());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Admin server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state
        .outbound
        .shutdown(config.delivery.shutdown_timeout())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
