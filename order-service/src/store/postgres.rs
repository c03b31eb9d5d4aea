use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::pooled_connection::bb8::Pool;
use diesel_async::pooled_connection::PoolError;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use shared::OrderStatus;

use crate::error::{OrderError, Result};
use crate::models::{NewOrder, Order};
use crate::schema::orders;
use super::OrderStore;

pub type DbPool = Pool<AsyncPgConnection>;

#[derive(Clone)]
pub struct PgOrderStore {
    pool: DbPool,
}

impl PgOrderStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn pool_error(e: bb8::RunError<PoolError>) -> OrderError {
    OrderError::Storage(format!("connection pool: {e}"))
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn insert(&self, order: &NewOrder) -> Result<Order> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        diesel::insert_into(orders::table)
            .values(order)
            .get_result::<Order>(&mut conn)
            .await
            .map_err(|e| match e {
                DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)
                    if order.idempotency_key.is_some() =>
                {
                    OrderError::DuplicateIdempotencyKey(
                        order.idempotency_key.clone().unwrap_or_default(),
                    )
                }
                other => other.into(),
            })
    }

    async fn find(&self, order_id: &str) -> Result<Option<Order>> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let order = orders::table
            .find(order_id)
            .first::<Order>(&mut conn)
            .await
            .optional()?;
        Ok(order)
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Order>> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let order = orders::table
            .filter(orders::idempotency_key.eq(key))
            .first::<Order>(&mut conn)
            .await
            .optional()?;
        Ok(order)
    }

    async fn update_status(
        &self,
        order_id: &str,
        status: OrderStatus,
        from: &[OrderStatus],
    ) -> Result<Option<Order>> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let order = diesel::update(
            orders::table
                .find(order_id)
                .filter(orders::status.eq_any(from.to_vec())),
        )
        .set((orders::status.eq(status), orders::updated_at.eq(Utc::now())))
        .get_result::<Order>(&mut conn)
        .await
        .optional()?;
        Ok(order)
    }

    async fn list_unresolved(&self, created_before: DateTime<Utc>) -> Result<Vec<Order>> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let pending = orders::table
            .filter(orders::status.eq_any(vec![OrderStatus::Pending, OrderStatus::Processing]))
            .filter(orders::created_at.lt(created_before))
            .order(orders::created_at.asc())
            .load::<Order>(&mut conn)
            .await?;
        Ok(pending)
    }
}
