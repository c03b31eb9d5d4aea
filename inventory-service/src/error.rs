use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use shared::ValidationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("invalid reservation request: {0}")]
    Validation(#[from] ValidationError),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("storage error: {0}")]
    Storage(String),

    /// Another transaction recorded a decision for this order first.
    #[error("reservation for order {0} already recorded")]
    DuplicateReservation(String),

    #[error("injected fault: {0}")]
    InjectedFault(String),

    #[error("callback delivery failed: {0}")]
    Delivery(String),
}

pub type Result<T> = std::result::Result<T, InventoryError>;

/// HTTP-facing error. Each route decides how an [`InventoryError`] maps here.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Unavailable(msg) => {
                tracing::warn!(error = %msg, "service unavailable");
                (StatusCode::SERVICE_UNAVAILABLE, msg)
            }
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(serde_json::json!({ "message": message }))).into_response()
    }
}
