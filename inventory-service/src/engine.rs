//! The reservation decision.
//!
//! `reserve` first consults the reservation ledger: an order that already has
//! a record gets that record's outcome back with `replay = true` and nothing
//! is written. Otherwise a single transaction locks the product row, decides,
//! writes the ledger record and the matching outbox event, and commits. A
//! failure before commit rolls everything back.

use std::sync::Arc;
use tracing::{error, info};

use shared::{ReservationStatus, ReserveTask};

use crate::chaos::ChaosInjector;
use crate::error::{InventoryError, Result};
use crate::models::ReservationRecord;
use crate::outbox;
use crate::store::{InventoryStore, InventoryTx};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReserveOutcome {
    pub success: bool,
    pub replay: bool,
}

impl ReserveOutcome {
    fn decided(status: ReservationStatus) -> Self {
        Self { success: status.is_success(), replay: false }
    }

    fn replayed(status: ReservationStatus) -> Self {
        Self { success: status.is_success(), replay: true }
    }
}

pub struct ReservationEngine {
    store: Arc<dyn InventoryStore>,
    chaos: ChaosInjector,
}

impl ReservationEngine {
    pub fn new(store: Arc<dyn InventoryStore>, chaos: ChaosInjector) -> Self {
        Self { store, chaos }
    }

    /// Callers validate `task` first: ids non-empty, quantity positive.
    pub async fn reserve(&self, task: &ReserveTask) -> Result<ReserveOutcome> {
        self.chaos.before_decision(&task.order_id).await;

        if let Some(existing) = self.store.find_reservation(&task.order_id).await? {
            info!(order_id = %task.order_id, status = %existing.status, "reservation replayed");
            return Ok(ReserveOutcome::replayed(existing.status));
        }

        let status = match self.decide(task).await {
            Ok(status) => status,
            Err(InventoryError::DuplicateReservation(order_id)) => {
                // A concurrent call for the same order committed first.
                let existing = self.store.find_reservation(&order_id).await?.ok_or_else(|| {
                    InventoryError::Storage(format!("reservation for {order_id} vanished"))
                })?;
                info!(order_id = %order_id, status = %existing.status, "lost race, replaying winner");
                return Ok(ReserveOutcome::replayed(existing.status));
            }
            Err(e) => return Err(e),
        };

        self.chaos.after_commit(&task.order_id)?;
        Ok(ReserveOutcome::decided(status))
    }

    async fn decide(&self, task: &ReserveTask) -> Result<ReservationStatus> {
        let mut tx = self.store.begin().await?;

        match Self::decide_in(tx.as_mut(), task).await {
            Ok(status) => {
                tx.commit().await?;
                info!(
                    order_id = %task.order_id,
                    product_id = %task.product_id,
                    quantity = task.quantity,
                    status = %status,
                    "reservation decided"
                );
                Ok(status)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    error!(order_id = %task.order_id, error = %rollback_err, "rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn decide_in(tx: &mut dyn InventoryTx, task: &ReserveTask) -> Result<ReservationStatus> {
        let product = tx.lock_product(&task.product_id).await?;

        let status = match product {
            Some(product) if product.available_stock >= task.quantity => {
                tx.decrement_stock(&task.product_id, task.quantity).await?;
                ReservationStatus::Success
            }
            _ => ReservationStatus::Failed,
        };

        tx.insert_reservation(&ReservationRecord::decided(task, status)).await?;
        outbox::enqueue(tx, &task.order_id, status.order_status()).await?;

        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chaos::ChaosConfig;
    use crate::store::InMemoryInventoryStore;
    use shared::OrderStatus;
    use std::time::Duration;

    fn task(order_id: &str, product_id: &str, quantity: i32) -> ReserveTask {
        ReserveTask {
            order_id: order_id.to_string(),
            product_id: product_id.to_string(),
            quantity,
        }
    }

    fn engine(store: &InMemoryInventoryStore) -> ReservationEngine {
        ReservationEngine::new(Arc::new(store.clone()), ChaosInjector::disabled())
    }

    #[tokio::test]
    async fn success_decrements_and_enqueues_confirmed() {
        let store = InMemoryInventoryStore::with_products([("P1", 3)]);
        let outcome = engine(&store).reserve(&task("o-a", "P1", 2)).await.unwrap();

        assert_eq!(outcome, ReserveOutcome { success: true, replay: false });
        assert_eq!(store.stock("P1").await, Some(1));

        let events = store.outbox_events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].order_id, "o-a");
        assert_eq!(events[0].order_status, OrderStatus::Confirmed);
        assert_eq!(events[0].attempts, 0);
    }

    #[tokio::test]
    async fn insufficient_stock_is_recorded_as_failed() {
        let store = InMemoryInventoryStore::with_products([("P1", 1)]);
        let outcome = engine(&store).reserve(&task("o-a", "P1", 2)).await.unwrap();

        assert_eq!(outcome, ReserveOutcome { success: false, replay: false });
        assert_eq!(store.stock("P1").await, Some(1));
        assert_eq!(store.reservation_count().await, 1);
        assert_eq!(store.outbox_events().await[0].order_status, OrderStatus::Failed);
    }

    #[tokio::test]
    async fn unknown_product_is_recorded_as_failed() {
        let store = InMemoryInventoryStore::new();
        let outcome = engine(&store).reserve(&task("o-a", "nope", 1)).await.unwrap();

        assert!(!outcome.success);
        assert_eq!(store.outbox_events().await[0].order_status, OrderStatus::Failed);
    }

    #[tokio::test]
    async fn repeated_reserve_is_replayed_without_second_decrement() {
        let store = InMemoryInventoryStore::with_products([("P1", 5)]);
        let engine = engine(&store);

        let first = engine.reserve(&task("o-a", "P1", 2)).await.unwrap();
        let second = engine.reserve(&task("o-a", "P1", 2)).await.unwrap();

        assert_eq!(first, ReserveOutcome { success: true, replay: false });
        assert_eq!(second, ReserveOutcome { success: true, replay: true });
        assert_eq!(store.stock("P1").await, Some(3));
        assert_eq!(store.outbox_events().await.len(), 1);
    }

    #[tokio::test]
    async fn replay_of_a_failure_stays_failed_after_restock() {
        let store = InMemoryInventoryStore::with_products([("P1", 0)]);
        let engine = engine(&store);

        assert!(!engine.reserve(&task("o-a", "P1", 1)).await.unwrap().success);
        store.set_stock("P1", 10).await;

        let replay = engine.reserve(&task("o-a", "P1", 1)).await.unwrap();
        assert_eq!(replay, ReserveOutcome { success: false, replay: true });
        assert_eq!(store.stock("P1").await, Some(10));
    }

    #[tokio::test]
    async fn concurrent_orders_for_last_unit_yield_exactly_one_success() {
        let store = InMemoryInventoryStore::with_products([("P1", 1)]);
        let engine = Arc::new(engine(&store));

        let (order_a, order_b) = (task("order-a", "P1", 1), task("order-b", "P1", 1));
        let (a, b) = tokio::join!(engine.reserve(&order_a), engine.reserve(&order_b));
        let successes = [a.unwrap(), b.unwrap()].iter().filter(|o| o.success).count();

        assert_eq!(successes, 1);
        assert_eq!(store.stock("P1").await, Some(0));
    }

    #[tokio::test]
    async fn stock_never_goes_negative_under_contention() {
        let store = InMemoryInventoryStore::with_products([("P1", 7)]);
        let engine = Arc::new(engine(&store));

        let mut handles = Vec::new();
        for i in 0..20 {
            let engine = engine.clone();
            let order = task(&format!("order-{i}"), "P1", 2);
            handles.push(tokio::spawn(async move { engine.reserve(&order).await }));
        }

        let mut reserved = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().success {
                reserved += 2;
            }
        }

        assert_eq!(reserved, 6);
        assert_eq!(store.stock("P1").await, Some(1));
    }

    #[tokio::test]
    async fn failure_before_commit_leaves_no_trace() {
        let store = InMemoryInventoryStore::with_products([("P1", 3)]);
        store.fail_outbox_writes(true);

        let err = engine(&store).reserve(&task("o-a", "P1", 1)).await.unwrap_err();

        assert!(matches!(err, InventoryError::Storage(_)));
        assert_eq!(store.stock("P1").await, Some(3));
        assert_eq!(store.reservation_count().await, 0);
        assert!(store.outbox_events().await.is_empty());
    }

    #[tokio::test]
    async fn post_commit_crash_keeps_the_decision_and_replay_reports_it() {
        let store = InMemoryInventoryStore::with_products([("P1", 1)]);
        let chaos = ChaosInjector::new(ChaosConfig {
            post_commit_fail_enabled: true,
            post_commit_fail_modulo: 3,
            delay: Duration::ZERO,
            ..ChaosConfig::default()
        });
        let engine = ReservationEngine::new(Arc::new(store.clone()), chaos);

        // digit sum of "order-3" is 3
        let err = engine.reserve(&task("order-3", "P1", 1)).await.unwrap_err();
        assert!(matches!(err, InventoryError::InjectedFault(_)));
        assert_eq!(store.stock("P1").await, Some(0));
        assert_eq!(store.outbox_events().await.len(), 1);

        let replay = engine.reserve(&task("order-3", "P1", 1)).await.unwrap();
        assert_eq!(replay, ReserveOutcome { success: true, replay: true });
        assert_eq!(store.stock("P1").await, Some(0));
    }
}
