//! Weather endpoints outside of trips.
//!
//! - GET    /api/v1/weather/point   (forecast for one coordinate and time)
//! - GET    /api/v1/weather/status  (fetcher health and last batch)
//! - DELETE /api/v1/weather/cache   (drop all cached snapshots)

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::errors::{AppError, ErrorResponse};
use crate::routes::AppState;
use crate::services::forecast::WeatherSnapshot;
use crate::services::status::WeatherStatus;

#[derive(Debug, Deserialize, IntoParams)]
pub struct PointQuery {
    pub lat: f64,
    pub lon: f64,
    /// Target time (ISO 8601), defaults to now
    pub time: Option<DateTime<Utc>>,
}

/// Get the forecast for a single coordinate.
///
/// Unlike the trip batch, failures are returned as errors instead of a
/// placeholder.
#[utoipa::path(
    get,
    path = "/api/v1/weather/point",
    tag = "Weather",
    params(PointQuery),
    responses(
        (status = 200, description = "Forecast for the coordinate", body = WeatherSnapshot),
        (status = 400, description = "Coordinate out of range", body = ErrorResponse),
        (status = 403, description = "No API key or key rejected", body = ErrorResponse),
        (status = 422, description = "Provider returned no forecast", body = ErrorResponse),
        (status = 502, description = "Provider unreachable or failing", body = ErrorResponse),
    )
)]
pub async fn get_point_weather(
    State(state): State<AppState>,
    Query(query): Query<PointQuery>,
) -> Result<Json<WeatherSnapshot>, AppError> {
    if !(-90.0..=90.0).contains(&query.lat) || !(-180.0..=180.0).contains(&query.lon) {
        return Err(AppError::BadRequest(format!(
            "invalid coordinate ({}, {})",
            query.lat, query.lon
        )));
    }
    let target = query.time.unwrap_or_else(Utc::now);
    let snapshot = state
        .weather
        .fetch_for_point(query.lat, query.lon, target)
        .await?;
    Ok(Json(snapshot))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WeatherStatusResponse {
    #[serde(flatten)]
    pub status: WeatherStatus,
    pub api_key_configured: bool,
    /// Snapshots currently held in the cache
    pub cached_entries: usize,
}

/// Get the current fetcher status.
#[utoipa::path(
    get,
    path = "/api/v1/weather/status",
    tag = "Weather",
    responses(
        (status = 200, description = "Current fetcher status", body = WeatherStatusResponse),
    )
)]
pub async fn get_weather_status(State(state): State<AppState>) -> Json<WeatherStatusResponse> {
    let status = state.status.read().await.clone();
    Json(WeatherStatusResponse {
        status,
        api_key_configured: state.weather.has_api_key(),
        cached_entries: state.weather.cached_entries().await,
    })
}

/// Drop all cached snapshots so the next fetch goes to the provider.
#[utoipa::path(
    delete,
    path = "/api/v1/weather/cache",
    tag = "Weather",
    responses(
        (status = 204, description = "Cache cleared"),
    )
)]
pub async fn clear_weather_cache(State(state): State<AppState>) -> StatusCode {
    state.weather.clear_cache().await;
    StatusCode::NO_CONTENT
}
