use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use shared::ValidationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("invalid order request: {0}")]
    Validation(#[from] ValidationError),

    #[error("order {0} not found")]
    NotFound(String),

    #[error("invalid callback token")]
    Unauthorized,

    /// The inventory side could not be reached or did not answer in time.
    #[error("inventory unavailable: {0}")]
    Unavailable(String),

    #[error("task queue error: {0}")]
    Queue(String),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("storage error: {0}")]
    Storage(String),

    /// Another request created an order with this idempotency key first.
    #[error("idempotency key {0} already used")]
    DuplicateIdempotencyKey(String),
}

pub type Result<T> = std::result::Result<T, OrderError>;

pub struct ApiError(pub OrderError);

impl From<OrderError> for ApiError {
    fn from(e: OrderError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            OrderError::Validation(_) => StatusCode::BAD_REQUEST,
            OrderError::Unauthorized => StatusCode::UNAUTHORIZED,
            OrderError::NotFound(_) => StatusCode::NOT_FOUND,
            OrderError::Unavailable(_) | OrderError::Queue(_) => {
                tracing::warn!(error = %self.0, "dependency unavailable");
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => {
                tracing::error!(error = %self.0, "internal server error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let message = match &self.0 {
            OrderError::Unavailable(_) | OrderError::Queue(_) => {
                "Inventory temporarily unavailable. Please retry.".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(serde_json::json!({ "message": message }))).into_response()
    }
}
