//! Order persistence. Every write is a single-row statement, so the store
//! needs no explicit transactions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::OrderStatus;

use crate::error::Result;
use crate::models::{NewOrder, Order};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryOrderStore;
pub use postgres::PgOrderStore;

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Fails with `DuplicateIdempotencyKey` if the key is taken.
    async fn insert(&self, order: &NewOrder) -> Result<Order>;

    async fn find(&self, order_id: &str) -> Result<Option<Order>>;

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Order>>;

    /// Sets `status` only if the order is currently in one of `from`.
    /// Returns the updated order, or `None` when nothing changed.
    async fn update_status(
        &self,
        order_id: &str,
        status: OrderStatus,
        from: &[OrderStatus],
    ) -> Result<Option<Order>>;

    /// PENDING and PROCESSING orders created before `created_before`, oldest first.
    async fn list_unresolved(&self, created_before: DateTime<Utc>) -> Result<Vec<Order>>;
}
