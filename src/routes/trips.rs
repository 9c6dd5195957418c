//! Trip HTTP endpoints.
//!
//! - POST   /api/v1/trips
//! - GET    /api/v1/trips
//! - GET    /api/v1/trips/:id
//! - DELETE /api/v1/trips/:id
//! - PUT    /api/v1/trips/:id/timing
//! - PUT    /api/v1/trips/:id/route
//! - PUT    /api/v1/trips/:id/rain-focus
//! - POST   /api/v1/trips/:id/weather
//! - DELETE /api/v1/trips/:id/weather

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::{AppError, ErrorResponse};
use crate::routes::gpx::{run_blocking, validate_spacing};
use crate::routes::AppState;
use crate::services::forecast::WeatherSnapshot;
use crate::services::resample::{reresample, ResampleResult};
use crate::services::timing::RoutePoint;
use crate::services::trips::{RainRule, Trip, WeatherAssessment};

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateTripRequest {
    /// Trip name; defaults to the GPX file name
    #[serde(default)]
    pub name: String,
    /// Result of the parse or resample endpoint
    pub route: ResampleResult,
    pub start_time: DateTime<Utc>,
    pub arrival_time: DateTime<Utc>,
    #[serde(default)]
    pub rain_focus_enabled: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RetimeRequest {
    pub start_time: DateTime<Utc>,
    pub arrival_time: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReplaceRouteRequest {
    pub route: ResampleResult,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RainFocusRequest {
    pub enabled: bool,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// A route point with the snapshot linked to it, if any.
#[derive(Debug, Serialize, ToSchema)]
pub struct TripPoint {
    #[serde(flatten)]
    pub point: RoutePoint,
    pub weather: Option<WeatherSnapshot>,
    /// Set when rain focus is on and this point's weather breaks the rain rule
    pub rain_highlight: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TripResponse {
    pub id: Uuid,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub arrival_time: DateTime<Utc>,
    pub duration_minutes: i64,
    pub distance_km: f64,
    pub average_speed_kmh: f64,
    pub gpx_file_name: String,
    /// "rain", "cold" or "good"; absent without weather
    pub assessment: Option<WeatherAssessment>,
    pub rain_focus_enabled: bool,
    pub points: Vec<TripPoint>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TripResponse {
    fn build(trip: &Trip, rule: &RainRule) -> Self {
        let points = trip
            .route_points
            .iter()
            .map(|p| TripPoint {
                point: p.clone(),
                weather: trip.weather_for_point(p).cloned(),
                rain_highlight: trip.rain_highlight(p, rule),
            })
            .collect();
        Self {
            id: trip.id,
            name: trip.name.clone(),
            start_time: trip.start_time,
            arrival_time: trip.arrival_time,
            duration_minutes: trip.duration().num_minutes(),
            distance_km: trip.distance_km,
            average_speed_kmh: trip.average_speed_kmh(),
            gpx_file_name: trip.gpx_file_name.clone(),
            assessment: trip.weather_assessment(rule),
            rain_focus_enabled: trip.rain_focus_enabled,
            points,
            created_at: trip.created_at,
            updated_at: trip.updated_at,
        }
    }
}

/// Response type for GET /api/v1/trips (without points).
#[derive(Debug, Serialize, ToSchema)]
pub struct TripListItem {
    pub id: Uuid,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub arrival_time: DateTime<Utc>,
    pub distance_km: f64,
    pub average_speed_kmh: f64,
    pub point_count: usize,
    pub has_weather: bool,
    pub assessment: Option<WeatherAssessment>,
    pub rain_focus_enabled: bool,
}

impl TripListItem {
    fn build(trip: &Trip, rule: &RainRule) -> Self {
        Self {
            id: trip.id,
            name: trip.name.clone(),
            start_time: trip.start_time,
            arrival_time: trip.arrival_time,
            distance_km: trip.distance_km,
            average_speed_kmh: trip.average_speed_kmh(),
            point_count: trip.route_points.len(),
            has_weather: !trip.weather.is_empty(),
            assessment: trip.weather_assessment(rule),
            rain_focus_enabled: trip.rain_focus_enabled,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn validate_times(start: DateTime<Utc>, arrival: DateTime<Utc>) -> Result<(), AppError> {
    if arrival < start {
        return Err(AppError::BadRequest(format!(
            "arrival_time {} is before start_time {}",
            arrival, start
        )));
    }
    Ok(())
}

/// Rebuild a client-supplied route from its raw samples so derived fields
/// always match them.
async fn normalise_route(route: ResampleResult) -> Result<ResampleResult, AppError> {
    if route.raw_samples.is_empty() {
        return Err(AppError::BadRequest("route has no samples".to_string()));
    }
    let spacing_km = validate_spacing(route.spacing_km)?;
    run_blocking(move || reresample(&route, spacing_km)).await
}

async fn respond(state: &AppState, trip: &Trip) -> Json<TripResponse> {
    let rule = state.rain_rule.read().await;
    Json(TripResponse::build(trip, &rule))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Create a trip from a parsed route, timed by distance along the track.
#[utoipa::path(
    post,
    path = "/api/v1/trips",
    tag = "Trips",
    request_body = CreateTripRequest,
    responses(
        (status = 201, description = "Trip created", body = TripResponse),
        (status = 400, description = "Invalid route or times", body = ErrorResponse),
    )
)]
pub async fn create_trip(
    State(state): State<AppState>,
    Json(req): Json<CreateTripRequest>,
) -> Result<(StatusCode, Json<TripResponse>), AppError> {
    validate_times(req.start_time, req.arrival_time)?;
    let route = normalise_route(req.route).await?;
    let name = match req.name.trim() {
        "" => route.file_name.clone(),
        n => n.to_string(),
    };

    let mut trip = Trip::from_route(&name, &route, req.start_time, req.arrival_time);
    trip.rain_focus_enabled = req.rain_focus_enabled;
    let trip = state.trips.insert(trip).await?;
    tracing::info!(
        "Created trip '{}' ({}) with {} points over {:.1} km",
        trip.name,
        trip.id,
        trip.route_points.len(),
        trip.distance_km
    );
    Ok((StatusCode::CREATED, respond(&state, &trip).await))
}

/// List all trips, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/trips",
    tag = "Trips",
    responses(
        (status = 200, description = "All trips", body = Vec<TripListItem>),
    )
)]
pub async fn list_trips(State(state): State<AppState>) -> Json<Vec<TripListItem>> {
    let trips = state.trips.list().await;
    let rule = state.rain_rule.read().await;
    Json(trips.iter().map(|t| TripListItem::build(t, &rule)).collect())
}

/// Get a trip with its points and linked weather.
#[utoipa::path(
    get,
    path = "/api/v1/trips/{id}",
    tag = "Trips",
    params(
        ("id" = Uuid, Path, description = "Trip UUID"),
    ),
    responses(
        (status = 200, description = "Trip detail", body = TripResponse),
        (status = 404, description = "Trip not found", body = ErrorResponse),
    )
)]
pub async fn get_trip(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TripResponse>, AppError> {
    let trip = state.trips.get(id).await?;
    Ok(respond(&state, &trip).await)
}

/// Delete a trip.
#[utoipa::path(
    delete,
    path = "/api/v1/trips/{id}",
    tag = "Trips",
    params(
        ("id" = Uuid, Path, description = "Trip UUID"),
    ),
    responses(
        (status = 204, description = "Trip deleted"),
        (status = 404, description = "Trip not found", body = ErrorResponse),
    )
)]
pub async fn delete_trip(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.trips.delete(id).await?;
    tracing::info!("Deleted trip {}", id);
    Ok(StatusCode::NO_CONTENT)
}

/// Change start and arrival time. Points are re-timed by their position in
/// the route; fetched weather is dropped when either time moves.
#[utoipa::path(
    put,
    path = "/api/v1/trips/{id}/timing",
    tag = "Trips",
    params(
        ("id" = Uuid, Path, description = "Trip UUID"),
    ),
    request_body = RetimeRequest,
    responses(
        (status = 200, description = "Trip re-timed", body = TripResponse),
        (status = 400, description = "Arrival before start", body = ErrorResponse),
        (status = 404, description = "Trip not found", body = ErrorResponse),
    )
)]
pub async fn retime_trip(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<RetimeRequest>,
) -> Result<Json<TripResponse>, AppError> {
    validate_times(req.start_time, req.arrival_time)?;
    let mut trip = state.trips.get(id).await?;
    trip.retime(req.start_time, req.arrival_time);
    let trip = state.trips.update(trip).await?;
    Ok(respond(&state, &trip).await)
}

/// Replace the route of a trip, keeping its timing and weather.
#[utoipa::path(
    put,
    path = "/api/v1/trips/{id}/route",
    tag = "Trips",
    params(
        ("id" = Uuid, Path, description = "Trip UUID"),
    ),
    request_body = ReplaceRouteRequest,
    responses(
        (status = 200, description = "Route replaced", body = TripResponse),
        (status = 400, description = "Invalid route", body = ErrorResponse),
        (status = 404, description = "Trip not found", body = ErrorResponse),
    )
)]
pub async fn replace_trip_route(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReplaceRouteRequest>,
) -> Result<Json<TripResponse>, AppError> {
    let route = normalise_route(req.route).await?;
    let mut trip = state.trips.get(id).await?;
    trip.replace_route(&route);
    let trip = state.trips.update(trip).await?;
    Ok(respond(&state, &trip).await)
}

/// Turn rain highlighting on or off for a trip.
#[utoipa::path(
    put,
    path = "/api/v1/trips/{id}/rain-focus",
    tag = "Trips",
    params(
        ("id" = Uuid, Path, description = "Trip UUID"),
    ),
    request_body = RainFocusRequest,
    responses(
        (status = 200, description = "Rain focus updated", body = TripResponse),
        (status = 404, description = "Trip not found", body = ErrorResponse),
    )
)]
pub async fn set_rain_focus(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<RainFocusRequest>,
) -> Result<Json<TripResponse>, AppError> {
    let mut trip = state.trips.get(id).await?;
    trip.rain_focus_enabled = req.enabled;
    let trip = state.trips.update(trip).await?;
    Ok(respond(&state, &trip).await)
}

/// Fetch weather for every route point and store it on the trip.
///
/// Points whose forecast cannot be fetched get a placeholder snapshot; the
/// request itself only fails without a configured API key, or with 409 when
/// the trip was re-timed or re-routed before the batch finished.
#[utoipa::path(
    post,
    path = "/api/v1/trips/{id}/weather",
    tag = "Trips",
    params(
        ("id" = Uuid, Path, description = "Trip UUID"),
    ),
    responses(
        (status = 200, description = "Trip with weather", body = TripResponse),
        (status = 403, description = "No API key configured", body = ErrorResponse),
        (status = 404, description = "Trip not found", body = ErrorResponse),
        (status = 409, description = "Trip changed during the fetch", body = ErrorResponse),
    )
)]
pub async fn fetch_trip_weather(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TripResponse>, AppError> {
    let trip = state.trips.get(id).await?;
    if !state.weather.has_api_key() {
        return Err(AppError::Forbidden(
            "No API key configured. Set one under /api/v1/settings/api-key".to_string(),
        ));
    }

    let snapshots = state.weather.fetch_for_route(&trip.route_points).await;
    let placeholders = snapshots.iter().filter(|s| s.is_placeholder()).count();
    state
        .status
        .write()
        .await
        .record_batch(snapshots.len(), placeholders, Utc::now());

    let trip = state
        .trips
        .replace_weather(id, trip.timing_revision, snapshots)
        .await?;
    Ok(respond(&state, &trip).await)
}

/// Drop the stored weather of a trip.
#[utoipa::path(
    delete,
    path = "/api/v1/trips/{id}/weather",
    tag = "Trips",
    params(
        ("id" = Uuid, Path, description = "Trip UUID"),
    ),
    responses(
        (status = 200, description = "Trip without weather", body = TripResponse),
        (status = 404, description = "Trip not found", body = ErrorResponse),
    )
)]
pub async fn clear_trip_weather(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TripResponse>, AppError> {
    let trip = state.trips.clear_weather(id).await?;
    Ok(respond(&state, &trip).await)
}
