use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::{OrderStatus, StatusCallback, ValidationError, CALLBACK_TOKEN_HEADER};
use std::sync::Arc;

use crate::error::{ApiError, OrderError};
use crate::models::Order;
use crate::orchestrator::{CreateOrder, OrderOrchestrator, OrderOutcome};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<OrderOrchestrator>,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub product_id: Option<String>,
    pub quantity: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct CreateOrderResponse {
    pub order_id: String,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued: Option<bool>,
    pub message: String,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/orders", post(create_order))
        .route("/api/orders/:order_id", get(get_order))
        .route("/api/orders/:order_id/status", post(update_order_status))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn malformed(rejection: JsonRejection) -> ApiError {
    OrderError::Validation(ValidationError::Malformed(rejection.body_text())).into()
}

pub async fn create_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateOrderResponse>), ApiError> {
    let Json(request) = body.map_err(malformed)?;

    let outcome = state
        .orchestrator
        .create_order(CreateOrder {
            user_id: header(&headers, USER_ID_HEADER).unwrap_or_else(|| "anonymous".to_string()),
            product_id: request.product_id,
            quantity: request.quantity,
            idempotency_key: header(&headers, IDEMPOTENCY_KEY_HEADER),
        })
        .await?;

    let (code, queued, message) = match &outcome {
        OrderOutcome::Confirmed(_) => (StatusCode::CREATED, None, "Order confirmed"),
        OrderOutcome::Rejected(_) => (StatusCode::CONFLICT, None, "Out of stock"),
        OrderOutcome::Processing { queued, .. } => {
            (StatusCode::ACCEPTED, Some(*queued), "Order accepted, reservation pending")
        }
    };
    let order = outcome.order();

    Ok((
        code,
        Json(CreateOrderResponse {
            order_id: order.order_id.clone(),
            status: order.status,
            queued,
            message: message.to_string(),
        }),
    ))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    Ok(Json(state.orchestrator.get_order(&order_id).await?))
}

/// Status callback from the inventory side.
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    headers: HeaderMap,
    body: Result<Json<StatusCallback>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let token = header(&headers, CALLBACK_TOKEN_HEADER);
    let callback = match body {
        Ok(Json(callback)) => callback,
        Err(rejection) => {
            state.orchestrator.verify_callback_token(token.as_deref())?;
            return Err(malformed(rejection));
        }
    };

    state
        .orchestrator
        .handle_callback(&order_id, token.as_deref(), &callback)
        .await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

pub async fn health_check() -> &'static str {
    "OK"
}
