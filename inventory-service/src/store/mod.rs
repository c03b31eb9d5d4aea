//! Storage for the product ledger, the reservation ledger and the outbox.
//!
//! All writes go through an [`InventoryTx`]: a unit of work obtained from
//! [`InventoryStore::begin`] that is either committed as a whole or rolled
//! back as a whole. Dropping a transaction without committing discards it.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::models::{NewOutboxEvent, OutboxEvent, Product, ReservationRecord};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryInventoryStore;
pub use postgres::PgInventoryStore;

#[async_trait]
pub trait InventoryStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn InventoryTx>>;

    /// Committed reservation decision for an order, if any.
    async fn find_reservation(&self, order_id: &str) -> Result<Option<ReservationRecord>>;

    /// Undelivered events that ran out of attempts, oldest first.
    async fn list_exhausted(&self, max_attempts: i32) -> Result<Vec<OutboxEvent>>;
}

#[async_trait]
pub trait InventoryTx: Send {
    /// Reads the product row and holds its lock until the transaction ends.
    async fn lock_product(&mut self, product_id: &str) -> Result<Option<Product>>;

    async fn decrement_stock(&mut self, product_id: &str, quantity: i32) -> Result<()>;

    /// Fails with `DuplicateReservation` if the order already has a record.
    async fn insert_reservation(&mut self, record: &ReservationRecord) -> Result<()>;

    async fn insert_outbox_event(&mut self, event: &NewOutboxEvent) -> Result<()>;

    /// Claims undelivered, due events with fewer than `max_attempts` attempts,
    /// in id order. Rows claimed by another open transaction are skipped.
    async fn fetch_due(&mut self, max_attempts: i32, limit: i64) -> Result<Vec<OutboxEvent>>;

    async fn mark_delivered(&mut self, id: i64) -> Result<()>;

    /// Bumps `attempts`, records the error and pushes `next_retry_at` to now + `backoff`.
    async fn mark_failed(&mut self, id: i64, error: &str, backoff: Duration) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
