use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use shared::{OrderStatus, ReservationStatus, ReservationView, ReserveTask};

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::products)]
pub struct Product {
    pub product_id: String,
    pub available_stock: i32,
}

/// One row of the idempotency ledger. Written once per order, never updated.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::reservations)]
pub struct ReservationRecord {
    pub order_id: String,
    pub product_id: String,
    pub quantity: i32,
    pub status: ReservationStatus,
    pub decided_at: DateTime<Utc>,
}

impl ReservationRecord {
    pub fn decided(task: &ReserveTask, status: ReservationStatus) -> Self {
        Self {
            order_id: task.order_id.clone(),
            product_id: task.product_id.clone(),
            quantity: task.quantity,
            status,
            decided_at: Utc::now(),
        }
    }
}

impl From<ReservationRecord> for ReservationView {
    fn from(record: ReservationRecord) -> Self {
        Self {
            order_id: record.order_id,
            product_id: record.product_id,
            quantity: record.quantity,
            status: record.status,
            decided_at: record.decided_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::outbox_events)]
pub struct OutboxEvent {
    pub id: i64,
    pub order_id: String,
    pub order_status: OrderStatus,
    pub delivered_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub next_retry_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::outbox_events)]
pub struct NewOutboxEvent {
    pub order_id: String,
    pub order_status: OrderStatus,
}
