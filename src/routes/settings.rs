//! User settings: provider API key and the rain rule used for assessments.
//!
//! - GET /api/v1/settings
//! - PUT /api/v1/settings/api-key
//! - PUT /api/v1/settings/rain-rule

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::{AppError, ErrorResponse};
use crate::routes::AppState;
use crate::services::trips::RainRule;

#[derive(Debug, Serialize, ToSchema)]
pub struct SettingsResponse {
    /// The key itself is never returned
    pub api_key_configured: bool,
    pub rain_rule: RainRule,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ApiKeyRequest {
    /// New key; null or blank removes it
    pub api_key: Option<String>,
}

async fn current(state: &AppState) -> SettingsResponse {
    SettingsResponse {
        api_key_configured: state.credentials.api_key().is_some(),
        rain_rule: state.rain_rule.read().await.clone(),
    }
}

/// Get the current settings.
#[utoipa::path(
    get,
    path = "/api/v1/settings",
    tag = "Settings",
    responses(
        (status = 200, description = "Current settings", body = SettingsResponse),
    )
)]
pub async fn get_settings(State(state): State<AppState>) -> Json<SettingsResponse> {
    Json(current(&state).await)
}

/// Replace the provider API key.
///
/// Resets the invalid-key flag and drops cached snapshots fetched with the
/// previous key.
#[utoipa::path(
    put,
    path = "/api/v1/settings/api-key",
    tag = "Settings",
    request_body = ApiKeyRequest,
    responses(
        (status = 200, description = "Key replaced", body = SettingsResponse),
    )
)]
pub async fn set_api_key(
    State(state): State<AppState>,
    Json(req): Json<ApiKeyRequest>,
) -> Json<SettingsResponse> {
    state.credentials.set_api_key(req.api_key);
    state.status.write().await.credential_replaced();
    state.weather.clear_cache().await;
    tracing::info!(
        "API key {}",
        if state.credentials.api_key().is_some() { "replaced" } else { "removed" }
    );
    Json(current(&state).await)
}

/// Replace the rule deciding when a trip counts as rainy.
#[utoipa::path(
    put,
    path = "/api/v1/settings/rain-rule",
    tag = "Settings",
    request_body = RainRule,
    responses(
        (status = 200, description = "Rule replaced", body = SettingsResponse),
        (status = 400, description = "Threshold out of range", body = ErrorResponse),
    )
)]
pub async fn set_rain_rule(
    State(state): State<AppState>,
    Json(rule): Json<RainRule>,
) -> Result<Json<SettingsResponse>, AppError> {
    if !(0.0..=100.0).contains(&rule.chance_threshold_pct) {
        return Err(AppError::BadRequest(format!(
            "chance_threshold_pct must be between 0 and 100, got {}",
            rule.chance_threshold_pct
        )));
    }
    if !rule.amount_threshold_mm.is_finite() || rule.amount_threshold_mm < 0.0 {
        return Err(AppError::BadRequest(format!(
            "amount_threshold_mm must be a non-negative number, got {}",
            rule.amount_threshold_mm
        )));
    }

    *state.rain_rule.write().await = rule;
    Ok(Json(current(&state).await))
}
