use async_trait::async_trait;
use chrono::Utc;
use shared::clock::now_plus;
use std::collections::HashMap;
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{InventoryError, Result};
use crate::models::{NewOutboxEvent, OutboxEvent, Product, ReservationRecord};
use super::{InventoryStore, InventoryTx};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    products: HashMap<String, i32>,
    reservations: HashMap<String, ReservationRecord>,
    outbox: Vec<OutboxEvent>,
    next_outbox_id: i64,
}

/// In-memory inventory store for tests.
///
/// A transaction holds the whole store's lock from `begin` until it ends, so
/// transactions are fully serialized. Writes go to a private copy that only
/// replaces the shared state on commit.
#[derive(Clone, Default)]
pub struct InMemoryInventoryStore {
    state: Arc<Mutex<MemoryState>>,
    #[cfg(test)]
    fail_outbox_writes: Arc<AtomicBool>,
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_products<I, S>(products: I) -> Self
    where
        I: IntoIterator<Item = (S, i32)>,
        S: Into<String>,
    {
        let state = MemoryState {
            products: products.into_iter().map(|(id, stock)| (id.into(), stock)).collect(),
            ..MemoryState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            ..Self::default()
        }
    }

    pub async fn set_stock(&self, product_id: &str, stock: i32) {
        self.state.lock().await.products.insert(product_id.to_string(), stock);
    }

    pub async fn stock(&self, product_id: &str) -> Option<i32> {
        self.state.lock().await.products.get(product_id).copied()
    }

    pub async fn outbox_events(&self) -> Vec<OutboxEvent> {
        self.state.lock().await.outbox.clone()
    }

    pub async fn reservation_count(&self) -> usize {
        self.state.lock().await.reservations.len()
    }

    /// Makes every outbox insert fail until switched off again.
    #[cfg(test)]
    pub fn fail_outbox_writes(&self, fail: bool) {
        self.fail_outbox_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn begin(&self) -> Result<Box<dyn InventoryTx>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryInventoryTx {
            guard,
            working,
            #[cfg(test)]
            fail_outbox_writes: self.fail_outbox_writes.load(Ordering::SeqCst),
        }))
    }

    async fn find_reservation(&self, order_id: &str) -> Result<Option<ReservationRecord>> {
        Ok(self.state.lock().await.reservations.get(order_id).cloned())
    }

    async fn list_exhausted(&self, max_attempts: i32) -> Result<Vec<OutboxEvent>> {
        let state = self.state.lock().await;
        Ok(state
            .outbox
            .iter()
            .filter(|e| e.delivered_at.is_none() && e.attempts >= max_attempts)
            .cloned()
            .collect())
    }
}

pub struct InMemoryInventoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    #[cfg(test)]
    fail_outbox_writes: bool,
}

impl InMemoryInventoryTx {
    fn event_mut(&mut self, id: i64) -> Result<&mut OutboxEvent> {
        self.working
            .outbox
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| InventoryError::Storage(format!("outbox event {id} not found")))
    }
}

#[async_trait]
impl InventoryTx for InMemoryInventoryTx {
    async fn lock_product(&mut self, product_id: &str) -> Result<Option<Product>> {
        Ok(self.working.products.get(product_id).map(|stock| Product {
            product_id: product_id.to_string(),
            available_stock: *stock,
        }))
    }

    async fn decrement_stock(&mut self, product_id: &str, quantity: i32) -> Result<()> {
        let stock = self
            .working
            .products
            .get_mut(product_id)
            .ok_or_else(|| InventoryError::Storage(format!("product {product_id} not found")))?;
        if *stock < quantity {
            return Err(InventoryError::Storage(format!(
                "stock for {product_id} would go negative"
            )));
        }
        *stock -= quantity;
        Ok(())
    }

    async fn insert_reservation(&mut self, record: &ReservationRecord) -> Result<()> {
        if self.working.reservations.contains_key(&record.order_id) {
            return Err(InventoryError::DuplicateReservation(record.order_id.clone()));
        }
        self.working.reservations.insert(record.order_id.clone(), record.clone());
        Ok(())
    }

    async fn insert_outbox_event(&mut self, event: &NewOutboxEvent) -> Result<()> {
        #[cfg(test)]
        if self.fail_outbox_writes {
            return Err(InventoryError::Storage("outbox write failed".to_string()));
        }
        self.working.next_outbox_id += 1;
        let now = Utc::now();
        self.working.outbox.push(OutboxEvent {
            id: self.working.next_outbox_id,
            order_id: event.order_id.clone(),
            order_status: event.order_status,
            delivered_at: None,
            attempts: 0,
            last_error: None,
            next_retry_at: now,
            created_at: now,
        });
        Ok(())
    }

    async fn fetch_due(&mut self, max_attempts: i32, limit: i64) -> Result<Vec<OutboxEvent>> {
        let now = Utc::now();
        Ok(self
            .working
            .outbox
            .iter()
            .filter(|e| e.delivered_at.is_none() && e.next_retry_at <= now && e.attempts < max_attempts)
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }

    async fn mark_delivered(&mut self, id: i64) -> Result<()> {
        let event = self.event_mut(id)?;
        event.delivered_at = Some(Utc::now());
        event.last_error = None;
        Ok(())
    }

    async fn mark_failed(&mut self, id: i64, error: &str, backoff: Duration) -> Result<()> {
        let event = self.event_mut(id)?;
        event.attempts += 1;
        event.last_error = Some(error.to_string());
        event.next_retry_at = now_plus(backoff);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let InMemoryInventoryTx { mut guard, working, .. } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
