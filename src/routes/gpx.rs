//! GPX import endpoints.
//!
//! - POST /api/v1/routes/parse?spacing_km=&file_name= (body: GPX document)
//! - POST /api/v1/routes/resample

use axum::body::Body;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

use crate::errors::{AppError, ErrorResponse};
use crate::routes::AppState;
use crate::services::gpx::{parse_gpx, GpxError};
use crate::services::resample::{reresample, ResampleResult};

/// Smallest accepted spacing (km).
pub(crate) const MIN_SPACING_KM: f64 = 0.1;
/// Largest accepted spacing (km).
pub(crate) const MAX_SPACING_KM: f64 = 10_000.0;
/// Upload size limit for GPX documents.
const MAX_GPX_BYTES: usize = 20 * 1024 * 1024;

pub(crate) fn validate_spacing(spacing_km: f64) -> Result<f64, AppError> {
    if spacing_km.is_finite() && (MIN_SPACING_KM..=MAX_SPACING_KM).contains(&spacing_km) {
        Ok(spacing_km)
    } else {
        Err(AppError::BadRequest(format!(
            "spacing_km must be between {} and {}, got {}",
            MIN_SPACING_KM, MAX_SPACING_KM, spacing_km
        )))
    }
}

/// Run CPU-bound route processing on the blocking pool.
pub(crate) async fn run_blocking<T, F>(work: F) -> Result<T, AppError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| AppError::InternalError(format!("route processing failed: {}", e)))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ParseQuery {
    /// Target distance between route points in km (default from config)
    pub spacing_km: Option<f64>,
    /// Name of the uploaded file, kept on the result
    pub file_name: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ResampleRequest {
    /// A result previously returned by the parse endpoint
    pub route: ResampleResult,
    /// New spacing in km
    pub spacing_km: f64,
}

/// Parse a GPX document and reduce it to route points.
#[utoipa::path(
    post,
    path = "/api/v1/routes/parse",
    tag = "Routes",
    params(ParseQuery),
    request_body(content = String, description = "GPX document", content_type = "application/gpx+xml"),
    responses(
        (status = 200, description = "Parsed and resampled route", body = ResampleResult),
        (status = 400, description = "Malformed document or invalid spacing", body = ErrorResponse),
        (status = 403, description = "Upload could not be read", body = ErrorResponse),
        (status = 422, description = "Document has no track, waypoints or route", body = ErrorResponse),
    )
)]
pub async fn parse_route(
    State(state): State<AppState>,
    Query(query): Query<ParseQuery>,
    body: Body,
) -> Result<Json<ResampleResult>, AppError> {
    let spacing_km = validate_spacing(query.spacing_km.unwrap_or(state.default_spacing_km))?;
    let bytes = axum::body::to_bytes(body, MAX_GPX_BYTES)
        .await
        .map_err(|e| GpxError::AccessDenied(format!("upload could not be read: {}", e)))?;
    let file_name = query
        .file_name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| "route.gpx".to_string());

    let result = run_blocking(move || parse_gpx(&bytes, &file_name, spacing_km)).await??;
    Ok(Json(result))
}

/// Redo the reduction of a parsed route at another spacing.
#[utoipa::path(
    post,
    path = "/api/v1/routes/resample",
    tag = "Routes",
    request_body = ResampleRequest,
    responses(
        (status = 200, description = "Route resampled at the new spacing", body = ResampleResult),
        (status = 400, description = "Invalid spacing", body = ErrorResponse),
    )
)]
pub async fn resample_route(
    Json(req): Json<ResampleRequest>,
) -> Result<Json<ResampleResult>, AppError> {
    let spacing_km = validate_spacing(req.spacing_km)?;
    let result = run_blocking(move || reresample(&req.route, spacing_km)).await?;
    Ok(Json(result))
}
