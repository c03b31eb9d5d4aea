use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use order_service::api::{create_router, AppState};
use order_service::error::{OrderError, Result};
use order_service::inventory::InventoryGateway;
use order_service::orchestrator::{Dispatch, OrchestratorConfig, OrderOrchestrator};
use order_service::queue::TaskQueue;
use order_service::store::{InMemoryOrderStore, OrderStore};
use shared::{OrderStatus, ReservationView, ReserveTask, ReserveTaskAck};

/// Approves quantities up to `limit`; never records anything for lookups.
struct StubInventory {
    limit: i32,
    down: AtomicBool,
}

#[async_trait]
impl InventoryGateway for StubInventory {
    async fn reserve(&self, task: &ReserveTask) -> Result<ReserveTaskAck> {
        if self.down.load(Ordering::SeqCst) {
            return Err(OrderError::Unavailable("connection refused".into()));
        }
        Ok(ReserveTaskAck {
            order_id: task.order_id.clone(),
            success: task.quantity <= self.limit,
            replay: false,
        })
    }

    async fn find_reservation(&self, _order_id: &str) -> Result<Option<ReservationView>> {
        Ok(None)
    }
}

struct DroppingQueue;

#[async_trait]
impl TaskQueue for DroppingQueue {
    async fn enqueue(&self, _task: &ReserveTask) -> Result<()> {
        Ok(())
    }
}

fn config() -> OrchestratorConfig {
    OrchestratorConfig {
        wait: Duration::from_millis(50),
        poll_interval: Duration::from_millis(10),
        callback_secret: Some("s3cret".into()),
        reconcile_after: Duration::ZERO,
    }
}

fn app(store: &InMemoryOrderStore, inventory: Arc<StubInventory>, dispatch: Dispatch) -> Router {
    let orchestrator = OrderOrchestrator::new(Arc::new(store.clone()), inventory, dispatch, config());
    create_router(AppState { orchestrator: Arc::new(orchestrator) })
}

fn stub(limit: i32) -> Arc<StubInventory> {
    Arc::new(StubInventory { limit, down: AtomicBool::new(false) })
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

fn post(uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
}

fn order_request(body: &str) -> Request<Body> {
    post("/api/orders").body(Body::from(body.to_string())).unwrap()
}

fn callback(order_id: &str, token: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = post(&format!("/api/orders/{order_id}/status"));
    if let Some(token) = token {
        builder = builder.header("x-callback-token", token);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn confirmed_order_is_201() {
    let store = InMemoryOrderStore::new();
    let (status, body) = send(
        app(&store, stub(5), Dispatch::Direct),
        order_request(r#"{"product_id":"P1","quantity":2}"#),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "CONFIRMED");
    assert!(body["order_id"].as_str().is_some_and(|id| !id.is_empty()));
    assert!(body.get("queued").is_none());
}

#[tokio::test]
async fn rejected_order_is_409() {
    let store = InMemoryOrderStore::new();
    let (status, body) = send(
        app(&store, stub(1), Dispatch::Direct),
        order_request(r#"{"product_id":"P1","quantity":2}"#),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["status"], "FAILED");
}

#[tokio::test]
async fn undecided_queued_order_is_202() {
    let store = InMemoryOrderStore::new();
    let (status, body) = send(
        app(&store, stub(5), Dispatch::Queued(Arc::new(DroppingQueue))),
        order_request(r#"{"product_id":"P1","quantity":1}"#),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "PROCESSING");
    assert_eq!(body["queued"], true);
}

#[tokio::test]
async fn unavailable_inventory_is_503() {
    let store = InMemoryOrderStore::new();
    let inventory = stub(5);
    inventory.down.store(true, Ordering::SeqCst);

    let (status, body) = send(
        app(&store, inventory, Dispatch::Direct),
        order_request(r#"{"product_id":"P1","quantity":1}"#),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["message"], "Inventory temporarily unavailable. Please retry.");
}

#[tokio::test]
async fn invalid_order_bodies_are_400() {
    let store = InMemoryOrderStore::new();

    for body in [r#"{"product_id":"P1","quantity":-1}"#, r#"{"quantity":1}"#, "{"] {
        let (status, _) = send(app(&store, stub(5), Dispatch::Direct), order_request(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    }
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn idempotency_key_header_reuses_the_order() {
    let store = InMemoryOrderStore::new();
    let inventory = stub(5);
    let request = || {
        Request::builder()
            .method("POST")
            .uri("/api/orders")
            .header("content-type", "application/json")
            .header("idempotency-key", "checkout-42")
            .header("x-user-id", "alice")
            .body(Body::from(r#"{"product_id":"P1","quantity":1}"#))
            .unwrap()
    };

    let (_, first) = send(app(&store, inventory.clone(), Dispatch::Direct), request()).await;
    let (status, second) = send(app(&store, inventory, Dispatch::Direct), request()).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["order_id"], second["order_id"]);
    assert_eq!(store.len().await, 1);

    let order_id = first["order_id"].as_str().unwrap();
    let get = Request::builder().uri(format!("/api/orders/{order_id}")).body(Body::empty()).unwrap();
    let (status, order) = send(app(&store, stub(5), Dispatch::Direct), get).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["user_id"], "alice");
    assert_eq!(order["status"], "CONFIRMED");
}

#[tokio::test]
async fn unknown_order_is_404() {
    let store = InMemoryOrderStore::new();
    let get = Request::builder().uri("/api/orders/nope").body(Body::empty()).unwrap();
    let (status, _) = send(app(&store, stub(5), Dispatch::Direct), get).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn callback_checks_token_then_status() {
    let store = InMemoryOrderStore::new();
    let (_, created) = send(
        app(&store, stub(5), Dispatch::Queued(Arc::new(DroppingQueue))),
        order_request(r#"{"product_id":"P1","quantity":1}"#),
    )
    .await;
    let order_id = created["order_id"].as_str().unwrap().to_string();
    let router = || app(&store, stub(5), Dispatch::Direct);

    let (status, _) = send(router(), callback(&order_id, Some("wrong"), r#"{"status":"CONFIRMED"}"#)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(router(), callback(&order_id, None, "garbage")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(router(), callback(&order_id, Some("s3cret"), r#"{"status":"SHIPPED"}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(router(), callback(&order_id, Some("s3cret"), r#"{"status":"CONFIRMED"}"#)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"ok": true}));

    // A redelivered callback is acknowledged again.
    let (status, _) = send(router(), callback(&order_id, Some("s3cret"), r#"{"status":"CONFIRMED"}"#)).await;
    assert_eq!(status, StatusCode::OK);

    let order = store.find(&order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Confirmed);
}
