use axum::extract::State;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::routes::AppState;

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Service status ("ok" when healthy, "degraded" when weather cannot be fetched)
    pub status: String,
    /// API version
    pub version: String,
    pub api_key_configured: bool,
    /// Result of the last reachability probe
    pub provider_reachable: bool,
}

/// Health check endpoint.
///
/// Returns status "degraded" (still 200) when no API key is set, the key was
/// rejected, or the provider is unreachable. Trip and route endpoints keep
/// working in that state.
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let api_key_configured = state.weather.has_api_key();
    let provider_reachable = state.weather.is_reachable();
    let key_valid = state.status.read().await.api_key_valid;

    Json(HealthResponse {
        status: if api_key_configured && key_valid && provider_reachable {
            "ok".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        api_key_configured,
        provider_reachable,
    })
}
