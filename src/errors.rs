use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::services::gpx::GpxError;
use crate::services::openweather::WeatherError;
use crate::services::trips::StoreError;

/// Standard error response body.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Human-readable error message
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::ExternalServiceError(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
        };

        (status, axum::Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<GpxError> for AppError {
    fn from(err: GpxError) -> Self {
        match err {
            GpxError::AccessDenied(_) => {
                AppError::Forbidden(format!("{}. Check the file and import it again", err))
            }
            GpxError::MalformedInput(_) => {
                AppError::BadRequest(format!("{}. Export the route again and retry", err))
            }
            GpxError::NoTrajectoryData => AppError::Unprocessable(format!(
                "{}. The file needs a track, waypoints or a route",
                err
            )),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => AppError::NotFound(err.to_string()),
            StoreError::Duplicate(_) => AppError::BadRequest(err.to_string()),
            StoreError::Conflict(_) => {
                AppError::Conflict(format!("{}. Fetch the weather again", err))
            }
        }
    }
}

impl From<WeatherError> for AppError {
    fn from(err: WeatherError) -> Self {
        match err {
            WeatherError::NoApiKey | WeatherError::InvalidApiKey => {
                AppError::Forbidden(err.to_string())
            }
            WeatherError::NoData => AppError::Unprocessable(err.to_string()),
            _ => AppError::ExternalServiceError(err.to_string()),
        }
    }
}
