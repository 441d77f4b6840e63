//! Admin API endpoints
//!
//! Read-only views of the outbound pool and its circuit breaker.

use axum::{
    Router,
    extract::{Path, State},
    response::Json,
    routing::get,
};

use crate::AppState;
use crate::error::AppError;
use crate::federation::{DomainStatus, extract_domain};

/// Create admin router
///
/// Routes:
/// - GET /admin/pool - Worker count and queue state
/// - GET /admin/domains - Domains with a recorded delivery failure
/// - GET /admin/domains/:domain - Failure record for one domain
pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/pool", get(pool_status))
        .route("/domains", get(list_domains))
        .route("/domains/:domain", get(get_domain))
}

/// Pool status response
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct PoolStatus {
    pub workers: usize,
    pub queue_capacity: usize,
    pub queue_available: usize,
    pub failing_domains: usize,
    pub shutting_down: bool,
}

/// GET /admin/pool
async fn pool_status(State(state): State<AppState>) -> Json<PoolStatus> {
    let pool = &state.outbound;
    Json(PoolStatus {
        workers: pool.size(),
        queue_capacity: pool.size(),
        queue_available: pool.available_capacity(),
        failing_domains: pool.circuit_breaker().len().await,
        shutting_down: pool.is_shutting_down(),
    })
}

/// GET /admin/domains
async fn list_domains(State(state): State<AppState>) -> Json<Vec<DomainStatus>> {
    Json(state.outbound.circuit_breaker().snapshot().await)
}

/// GET /admin/domains/:domain
///
/// Healthy domains have no record and return 404.
async fn get_domain(
    State(state): State<AppState>,
    Path(domain): Path<String>,
) -> Result<Json<DomainStatus>, AppError> {
    let domain = extract_domain(&domain);
    state
        .outbound
        .circuit_breaker()
        .snapshot()
        .await
        .into_iter()
        .find(|status| status.domain == domain)
        .map(Json)
        .ok_or(AppError::NotFound)
}
