//! Entry point for reservation tasks, shared by the HTTP route and the queue
//! consumer.
//!
//! A well-formed task is always acknowledged once the engine has decided,
//! whatever the decision was. Only malformed payloads and infrastructure
//! failures surface as errors.
//!
//! Every handled task, replays included, wakes the outbox scheduler so a
//! pending callback goes out before the next tick.

use shared::{ReserveTask, ReserveTaskAck, ReserveTaskPayload};
use std::sync::Arc;

use crate::engine::ReservationEngine;
use crate::error::Result;
use crate::outbox::OutboxDispatcher;

#[derive(Clone)]
pub struct TaskIngress {
    engine: Arc<ReservationEngine>,
    dispatcher: Option<Arc<OutboxDispatcher>>,
}

impl TaskIngress {
    pub fn new(engine: Arc<ReservationEngine>, dispatcher: Option<Arc<OutboxDispatcher>>) -> Self {
        Self { engine, dispatcher }
    }

    pub fn engine(&self) -> &ReservationEngine {
        &self.engine
    }

    pub async fn handle(&self, payload: ReserveTaskPayload) -> Result<ReserveTaskAck> {
        let task = payload.validate()?;
        self.process(&task).await
    }

    pub async fn process(&self, task: &ReserveTask) -> Result<ReserveTaskAck> {
        let outcome = self.engine.reserve(task).await?;
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.wake();
        }

        Ok(ReserveTaskAck {
            order_id: task.order_id.clone(),
            success: outcome.success,
            replay: outcome.replay,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chaos::ChaosInjector;
    use crate::error::InventoryError;
    use crate::outbox::{CallbackSender, OutboxConfig};
    use crate::models::{OutboxEvent, ReservationRecord};
    use crate::store::{InMemoryInventoryStore, InventoryStore, InventoryTx};
    use async_trait::async_trait;
    use serde_json::json;
    use shared::{OrderStatus, ValidationError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    struct ChannelSender(mpsc::UnboundedSender<(String, OrderStatus)>);

    #[async_trait]
    impl CallbackSender for ChannelSender {
        async fn send(&self, order_id: &str, status: OrderStatus) -> crate::error::Result<()> {
            let _ = self.0.send((order_id.to_string(), status));
            Ok(())
        }
    }

    /// Counts transactions, which is one per dispatcher pass.
    struct CountingStore {
        inner: InMemoryInventoryStore,
        begins: AtomicUsize,
    }

    #[async_trait]
    impl InventoryStore for CountingStore {
        async fn begin(&self) -> crate::error::Result<Box<dyn InventoryTx>> {
            self.begins.fetch_add(1, Ordering::SeqCst);
            self.inner.begin().await
        }

        async fn find_reservation(&self, order_id: &str) -> crate::error::Result<Option<ReservationRecord>> {
            self.inner.find_reservation(order_id).await
        }

        async fn list_exhausted(&self, max_attempts: i32) -> crate::error::Result<Vec<OutboxEvent>> {
            self.inner.list_exhausted(max_attempts).await
        }
    }

    fn idle_scheduler() -> OutboxConfig {
        OutboxConfig { poll_interval: Duration::from_secs(3600), ..OutboxConfig::default() }
    }

    fn payload(value: serde_json::Value) -> ReserveTaskPayload {
        serde_json::from_value(value).unwrap()
    }

    fn ingress(store: &InMemoryInventoryStore) -> TaskIngress {
        let engine = ReservationEngine::new(Arc::new(store.clone()), ChaosInjector::disabled());
        TaskIngress::new(Arc::new(engine), None)
    }

    #[tokio::test]
    async fn business_failure_is_still_acknowledged() {
        let store = InMemoryInventoryStore::with_products([("P1", 0)]);
        let ack = ingress(&store)
            .handle(payload(json!({"order_id": "o-1", "product_id": "P1", "quantity": 1})))
            .await
            .unwrap();

        assert_eq!(ack, ReserveTaskAck { order_id: "o-1".into(), success: false, replay: false });
    }

    #[tokio::test]
    async fn malformed_task_never_reaches_the_engine() {
        let store = InMemoryInventoryStore::with_products([("P1", 5)]);
        let err = ingress(&store)
            .handle(payload(json!({"order_id": "o-1", "product_id": "P1", "quantity": 0})))
            .await
            .unwrap_err();

        assert!(matches!(err, InventoryError::Validation(ValidationError::InvalidQuantity(_))));
        assert_eq!(store.reservation_count().await, 0);
    }

    #[tokio::test]
    async fn redelivered_task_is_acknowledged_as_replay() {
        let store = InMemoryInventoryStore::with_products([("P1", 5)]);
        let ingress = ingress(&store);
        let task = json!({"order_id": "o-1", "product_id": "P1", "quantity": "2"});

        let first = ingress.handle(payload(task.clone())).await.unwrap();
        let second = ingress.handle(payload(task)).await.unwrap();

        assert!(first.success && !first.replay);
        assert!(second.success && second.replay);
        assert_eq!(store.stock("P1").await, Some(3));
    }

    #[tokio::test]
    async fn handling_a_task_wakes_the_scheduler() {
        let store = InMemoryInventoryStore::with_products([("P1", 5)]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(OutboxDispatcher::new(
            Arc::new(store.clone()),
            Arc::new(ChannelSender(tx)),
            idle_scheduler(),
        ));
        let cancel = CancellationToken::new();
        let scheduler = dispatcher.clone().spawn(cancel.clone());
        // let the first tick's pass run on an empty outbox
        tokio::time::sleep(Duration::from_millis(50)).await;

        let engine = ReservationEngine::new(Arc::new(store.clone()), ChaosInjector::disabled());
        let ingress = TaskIngress::new(Arc::new(engine), Some(dispatcher));
        ingress
            .handle(payload(json!({"order_id": "o-9", "product_id": "P1", "quantity": 1})))
            .await
            .unwrap();

        let delivered = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(delivered, Some(("o-9".to_string(), OrderStatus::Confirmed)));

        cancel.cancel();
        scheduler.await.unwrap();
    }

    #[tokio::test]
    async fn a_burst_of_tasks_collapses_into_few_passes() {
        let store = InMemoryInventoryStore::with_products([("P1", 100)]);
        let counting = Arc::new(CountingStore { inner: store.clone(), begins: AtomicUsize::new(0) });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(OutboxDispatcher::new(
            counting.clone(),
            Arc::new(ChannelSender(tx)),
            idle_scheduler(),
        ));
        let engine = ReservationEngine::new(Arc::new(store.clone()), ChaosInjector::disabled());
        let ingress = TaskIngress::new(Arc::new(engine), Some(dispatcher.clone()));

        // No scheduler yet, so every wake-up lands on the same pending permit.
        for i in 0..20 {
            ingress
                .handle(payload(json!({"order_id": format!("o-{i}"), "product_id": "P1", "quantity": 1})))
                .await
                .unwrap();
        }
        assert_eq!(counting.begins.load(Ordering::SeqCst), 0);

        let cancel = CancellationToken::new();
        let scheduler = dispatcher.clone().spawn(cancel.clone());
        for _ in 0..20 {
            tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        scheduler.await.unwrap();

        // the first tick plus a single woken pass
        assert!(counting.begins.load(Ordering::SeqCst) <= 2);
        assert!(store.outbox_events().await.iter().all(|e| e.delivered_at.is_some()));
    }
}
