//! API layer
//!
//! HTTP handlers for:
//! - Health check
//! - Metrics (Prometheus)
//! - Admin API (outbound pool and circuit-breaker state)

mod admin;

use axum::{Router, http::header, response::IntoResponse, routing::get};
use prometheus::{Encoder, TextEncoder};

use crate::error::AppError;
use crate::metrics::REGISTRY;

pub use admin::admin_router;

/// Router for `/health` and `/metrics`
pub fn operational_router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
}

async fn health_check() -> &'static str {
    "OK"
}

/// GET /metrics
///
/// Returns all registered metrics in Prometheus text format.
async fn metrics_handler() -> Result<impl IntoResponse, AppError> {
    let encoder = TextEncoder::new();
    let body = encoder
        .encode_to_string(&REGISTRY.gather())
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to encode metrics: {e}")))?;

    Ok(([(header::CONTENT_TYPE, encoder.format_type().to_string())], body))
}
