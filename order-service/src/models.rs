use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use shared::OrderStatus;

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::orders)]
pub struct Order {
    pub order_id: String,
    pub user_id: String,
    pub product_id: String,
    pub quantity: i32,
    pub status: OrderStatus,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn reserve_task(&self) -> shared::ReserveTask {
        shared::ReserveTask {
            order_id: self.order_id.clone(),
            product_id: self.product_id.clone(),
            quantity: self.quantity,
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::orders)]
pub struct NewOrder {
    pub order_id: String,
    pub user_id: String,
    pub product_id: String,
    pub quantity: i32,
    pub status: OrderStatus,
    pub idempotency_key: Option<String>,
}

impl NewOrder {
    /// A fresh PENDING order with a random id.
    pub fn pending(
        user_id: String,
        product_id: String,
        quantity: i32,
        idempotency_key: Option<String>,
    ) -> Self {
        Self {
            order_id: uuid::Uuid::new_v4().to_string(),
            user_id,
            product_id,
            quantity,
            status: OrderStatus::Pending,
            idempotency_key,
        }
    }
}
