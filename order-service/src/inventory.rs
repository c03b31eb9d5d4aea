//! Calls into the inventory side: the direct reserve and the reservation
//! lookup used for polling and reconciliation.

use async_trait::async_trait;
use reqwest::StatusCode;
use shared::retry::{retry, with_deadline, RetryPolicy};
use shared::{ReservationView, ReserveTask, ReserveTaskAck};

use crate::error::{OrderError, Result};

#[async_trait]
pub trait InventoryGateway: Send + Sync {
    /// Submits the task and waits for the decision.
    async fn reserve(&self, task: &ReserveTask) -> Result<ReserveTaskAck>;

    /// The decision recorded for `order_id`, or `None` if there is none yet.
    async fn find_reservation(&self, order_id: &str) -> Result<Option<ReservationView>>;
}

pub struct HttpInventoryGateway {
    client: reqwest::Client,
    base_url: String,
    policy: RetryPolicy,
}

impl HttpInventoryGateway {
    pub fn new(base_url: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            policy,
        }
    }

    async fn post_task(&self, task: &ReserveTask) -> std::result::Result<ReserveTaskAck, String> {
        let response = self
            .client
            .post(format!("{}/tasks/reserve", self.base_url))
            .json(task)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("reserve returned {status}: {body}"));
        }
        response.json::<ReserveTaskAck>().await.map_err(|e| e.to_string())
    }

    async fn get_reservation(
        &self,
        order_id: &str,
    ) -> std::result::Result<Option<ReservationView>, String> {
        let response = self
            .client
            .get(format!("{}/api/reservations/{order_id}", self.base_url))
            .send()
            .await
            .map_err(|e| e.to_string())?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json::<ReservationView>()
                .await
                .map(Some)
                .map_err(|e| e.to_string()),
            status => Err(format!("reservation lookup returned {status}")),
        }
    }
}

#[async_trait]
impl InventoryGateway for HttpInventoryGateway {
    async fn reserve(&self, task: &ReserveTask) -> Result<ReserveTaskAck> {
        retry(&self.policy, || self.post_task(task))
            .await
            .map_err(|e| OrderError::Unavailable(e.to_string()))
    }

    async fn find_reservation(&self, order_id: &str) -> Result<Option<ReservationView>> {
        with_deadline(self.policy.deadline, self.get_reservation(order_id))
            .await
            .map_err(|e| OrderError::Unavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::StatusCode as HttpStatus;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(5), Duration::from_millis(200))
    }

    fn task() -> ReserveTask {
        ReserveTask { order_id: "o-1".into(), product_id: "P1".into(), quantity: 1 }
    }

    #[tokio::test]
    async fn reserve_retries_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let app = Router::new().route(
            "/tasks/reserve",
            post(move |Json(task): Json<ReserveTask>| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        return Err(HttpStatus::INTERNAL_SERVER_ERROR);
                    }
                    Ok(Json(ReserveTaskAck { order_id: task.order_id, success: true, replay: true }))
                }
            }),
        );
        let gateway = HttpInventoryGateway::new(serve(app).await, policy());

        let ack = gateway.reserve(&task()).await.unwrap();

        assert!(ack.success && ack.replay);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn reserve_gives_up_on_a_slow_peer() {
        let app = Router::new().route(
            "/tasks/reserve",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                HttpStatus::OK
            }),
        );
        let gateway = HttpInventoryGateway::new(serve(app).await, policy());

        let err = gateway.reserve(&task()).await.unwrap_err();
        assert!(matches!(err, OrderError::Unavailable(_)), "{err}");
    }

    #[tokio::test]
    async fn lookup_maps_404_to_none() {
        let app = Router::new().route(
            "/api/reservations/:order_id",
            get(|Path(order_id): Path<String>| async move {
                if order_id == "known" {
                    Ok(Json(serde_json::json!({
                        "order_id": "known",
                        "product_id": "P1",
                        "quantity": 1,
                        "status": "SUCCESS",
                        "decided_at": "2024-06-01T00:00:00Z"
                    })))
                } else {
                    Err(HttpStatus::NOT_FOUND)
                }
            }),
        );
        let gateway = HttpInventoryGateway::new(serve(app).await, policy());

        assert!(gateway.find_reservation("unknown").await.unwrap().is_none());
        let view = gateway.find_reservation("known").await.unwrap().unwrap();
        assert_eq!(view.status, shared::ReservationStatus::Success);
    }
}
