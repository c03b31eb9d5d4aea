use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use shared::{ReservationView, ReserveRpcResponse, ReserveTaskAck, ReserveTaskPayload};
use std::sync::Arc;
use tracing::warn;

use crate::error::{ApiError, InventoryError};
use crate::ingress::TaskIngress;
use crate::models::OutboxEvent;
use crate::store::InventoryStore;

const INVALID_TASK: &str = "Invalid task payload";

#[derive(Clone)]
pub struct AppState {
    pub ingress: TaskIngress,
    pub store: Arc<dyn InventoryStore>,
    pub max_attempts: i32,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/tasks/reserve", post(reserve_task))
        .route("/rpc/reserve", post(reserve_rpc))
        .route("/api/reservations/:order_id", get(get_reservation))
        .route("/api/outbox/exhausted", get(exhausted_events))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

fn parse_body(
    body: Result<Json<ReserveTaskPayload>, JsonRejection>,
) -> Result<ReserveTaskPayload, ApiError> {
    body.map(|Json(payload)| payload).map_err(|rejection| {
        warn!(error = %rejection, "unreadable task body");
        ApiError::BadRequest(INVALID_TASK.to_string())
    })
}

fn validation_as_bad_request(e: InventoryError, otherwise: fn(String) -> ApiError) -> ApiError {
    match e {
        InventoryError::Validation(v) => {
            warn!(error = %v, "rejected task");
            ApiError::BadRequest(INVALID_TASK.to_string())
        }
        other => otherwise(other.to_string()),
    }
}

/// Always 200 for a well-formed task, whatever the reservation outcome.
pub async fn reserve_task(
    State(state): State<AppState>,
    body: Result<Json<ReserveTaskPayload>, JsonRejection>,
) -> Result<Json<ReserveTaskAck>, ApiError> {
    let payload = parse_body(body)?;
    let ack = state
        .ingress
        .handle(payload)
        .await
        .map_err(|e| validation_as_bad_request(e, ApiError::Internal))?;
    Ok(Json(ack))
}

/// Synchronous reserve. Infrastructure failures are 503 so the caller retries.
pub async fn reserve_rpc(
    State(state): State<AppState>,
    body: Result<Json<ReserveTaskPayload>, JsonRejection>,
) -> Result<Json<ReserveRpcResponse>, ApiError> {
    let payload = parse_body(body)?;
    let ack = state
        .ingress
        .handle(payload)
        .await
        .map_err(|e| validation_as_bad_request(e, ApiError::Unavailable))?;
    Ok(Json(ReserveRpcResponse { success: ack.success }))
}

pub async fn get_reservation(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<ReservationView>, ApiError> {
    let record = state
        .store
        .find_reservation(&order_id)
        .await
        .map_err(|e| ApiError::Unavailable(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("no reservation for order {order_id}")))?;
    Ok(Json(record.into()))
}

pub async fn exhausted_events(
    State(state): State<AppState>,
) -> Result<Json<Vec<OutboxEvent>>, ApiError> {
    let events = state
        .store
        .list_exhausted(state.max_attempts)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(events))
}

pub async fn health_check() -> &'static str {
    "OK"
}
