use axum::{extract::State, Json};
use crate::models::{HealthResponse, ReadyResponse};
use crate::AppState;
use tracing::debug;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health_check() -> Json<HealthResponse> {
    debug!("Health check requested");
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "Relay is running".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check endpoint
#[utoipa::path(
    get,
    path = "/api/ready",
    responses(
        (status = 200, description = "Readiness and access store status", body = ReadyResponse)
    )
)]
pub async fn ready_check(State(state): State<AppState>) -> Json<ReadyResponse> {
    debug!("Readiness check requested");
    let access_store = state.resolver.is_available();
    Json(ReadyResponse {
        status: "ok".to_string(),
        message: if access_store {
            "Relay is ready".to_string()
        } else {
            "Relay is ready, scoped rooms are closed until an access store is configured".to_string()
        },
        access_store,
    })
}
