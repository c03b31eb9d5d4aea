use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::OrderStatus;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{OrderError, Result};
use crate::models::{NewOrder, Order};
use super::OrderStore;

/// In-memory order store for tests.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    orders: Arc<Mutex<HashMap<String, Order>>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.orders.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.orders.lock().await.is_empty()
    }

    /// Shifts an order's creation time, for exercising age-based sweeps.
    pub async fn backdate(&self, order_id: &str, by: chrono::Duration) {
        if let Some(order) = self.orders.lock().await.get_mut(order_id) {
            order.created_at -= by;
        }
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: &NewOrder) -> Result<Order> {
        let mut orders = self.orders.lock().await;
        if let Some(key) = &order.idempotency_key {
            if orders.values().any(|o| o.idempotency_key.as_ref() == Some(key)) {
                return Err(OrderError::DuplicateIdempotencyKey(key.clone()));
            }
        }
        if orders.contains_key(&order.order_id) {
            return Err(OrderError::Storage(format!("order {} already exists", order.order_id)));
        }

        let now = Utc::now();
        let stored = Order {
            order_id: order.order_id.clone(),
            user_id: order.user_id.clone(),
            product_id: order.product_id.clone(),
            quantity: order.quantity,
            status: order.status,
            idempotency_key: order.idempotency_key.clone(),
            created_at: now,
            updated_at: now,
        };
        orders.insert(stored.order_id.clone(), stored.clone());
        Ok(stored)
    }

    async fn find(&self, order_id: &str) -> Result<Option<Order>> {
        Ok(self.orders.lock().await.get(order_id).cloned())
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Order>> {
        let orders = self.orders.lock().await;
        Ok(orders
            .values()
            .find(|o| o.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn update_status(
        &self,
        order_id: &str,
        status: OrderStatus,
        from: &[OrderStatus],
    ) -> Result<Option<Order>> {
        let mut orders = self.orders.lock().await;
        match orders.get_mut(order_id) {
            Some(order) if from.contains(&order.status) => {
                order.status = status;
                order.updated_at = Utc::now();
                Ok(Some(order.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn list_unresolved(&self, created_before: DateTime<Utc>) -> Result<Vec<Order>> {
        let orders = self.orders.lock().await;
        let mut pending: Vec<Order> = orders
            .values()
            .filter(|o| !o.status.is_terminal() && o.created_at < created_before)
            .cloned()
            .collect();
        pending.sort_by_key(|o| o.created_at);
        Ok(pending)
    }
}
