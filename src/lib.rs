//! Outbox Relay - outbound delivery engine for an ActivityPub server
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Callers (outbox)                          │
//! │  - Build signed DeliveryJobs                                │
//! │  - enqueue / try_enqueue / enqueue_timeout / fan_out        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     OutboundPool                             │
//! │  - Circuit breaker admission at enqueue                     │
//! │  - Bounded dispatch queue (capacity = workers)              │
//! │  - N workers sharing one DeliveryTransport                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Remote inboxes (HTTP)                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `federation`: jobs, circuit breaker, transport, pool sizing, worker pool
//! - `data`: follower records (SQLite) used to size the pool
//! - `api`: health, metrics and admin endpoints
//! - `config`: Configuration management
//! - `error`: Error types

pub mod api;
pub mod config;
pub mod data;
pub mod error;
pub mod federation;
pub mod metrics;

use std::sync::Arc;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Database connection pool
    pub db: Arc<data::Database>,

    /// Outbound delivery pool
    pub outbound: Arc<federation::OutboundPool>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Connect to SQLite database
    /// 2. Decide the outbound pool size (configured or follower-based)
    /// 3. Start the outbound worker pool
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        let db = data::Database::connect(&config.database.path).await?;

        let pool_size = match config.delivery.pool_size {
            Some(size) => {
                tracing::info!(workers = size, "Using configured outbound pool size");
                size
            }
            None => federation::outbound_pool_size(&db).await,
        };

        let outbound = federation::OutboundPool::initialize(pool_size, &config.delivery)?;

        tracing::info!("Application state initialized successfully");

        Ok(Self {
            config: Arc::new(config),
            db: Arc::new(db),
            outbound: Arc::new(outbound),
        })
    }
}

/// Build the Axum router with all routes.
///
/// Shared by the binary and integration tests.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::trace::TraceLayer;

    Router::new()
        .nest("/admin", api::admin_router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .merge(api::operational_router())
}
