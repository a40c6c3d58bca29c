//! System endpoints: health check and package catalogue.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;

use crate::app_state::AppState;
use crate::service::EntitlementResolver;
use crate::service::entitlement::PackageOffer;

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
struct HealthResponse {
    status: String,
    timestamp: String,
    version: String,
    uptime_secs: u64,
}

/// `GET /health`: Service health status.
#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    summary = "Health check",
    description = "Returns service health status, version, uptime and current timestamp.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
    )
)]
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: state.started_at.elapsed().as_secs(),
        }),
    )
}

/// `GET /config/packages`: List purchasable packages.
#[utoipa::path(
    get,
    path = "/config/packages",
    tag = "System",
    summary = "List packages",
    description = "Returns every package tier with its price, quotas and feature flags.",
    responses(
        (status = 200, description = "Package catalogue", body = Vec<PackageOffer>),
    )
)]
pub async fn packages_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(EntitlementResolver::catalogue()))
}

/// System routes mounted at the root level (not under /api/v1).
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_handler))
        .route("/config/packages", get(packages_handler))
}
