use crate::engine::PlacementError;
use crate::service::CompensationError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Internal server error: {0}")]
    Internal(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<CompensationError> for AppError {
    fn from(err: CompensationError) -> Self {
        let message = err.to_string();
        match err {
            CompensationError::NodeNotFound(_) => AppError::NotFound(message),
            CompensationError::Placement(PlacementError::UnknownSponsor(_)) => {
                AppError::NotFound(message)
            }
            CompensationError::Placement(PlacementError::AlreadyExists(_))
            | CompensationError::Placement(PlacementError::LegOccupied { .. })
            | CompensationError::Placement(PlacementError::SponsorLegsFull(_)) => {
                AppError::Conflict(message)
            }
            CompensationError::InvalidSale(_)
            | CompensationError::BadTimestamp(_)
            | CompensationError::NegativeVolume(_) => AppError::BadRequest(message),
            CompensationError::Placement(_) | CompensationError::Db(_) => {
                AppError::Internal(message)
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Internal(msg) => {
                error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}
