use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use shared::clock::now_plus;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::pooled_connection::PoolError;
use diesel_async::{AnsiTransactionManager, AsyncPgConnection, RunQueryDsl, TransactionManager};
use std::time::Duration;

use crate::error::{InventoryError, Result};
use crate::models::*;
use crate::schema::*;
use super::{InventoryStore, InventoryTx};

pub type DbPool = Pool<AsyncPgConnection>;

#[derive(Clone)]
pub struct PgInventoryStore {
    pool: DbPool,
}

impl PgInventoryStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn pool_error(e: bb8::RunError<PoolError>) -> InventoryError {
    InventoryError::Storage(format!("connection pool: {e}"))
}

#[async_trait]
impl InventoryStore for PgInventoryStore {
    async fn begin(&self) -> Result<Box<dyn InventoryTx>> {
        let mut conn = self.pool.get_owned().await.map_err(pool_error)?;
        AnsiTransactionManager::begin_transaction(&mut *conn).await?;
        Ok(Box::new(PgInventoryTx { conn }))
    }

    async fn find_reservation(&self, order_id: &str) -> Result<Option<ReservationRecord>> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let record = reservations::table
            .find(order_id)
            .first::<ReservationRecord>(&mut conn)
            .await
            .optional()?;
        Ok(record)
    }

    async fn list_exhausted(&self, max_attempts: i32) -> Result<Vec<OutboxEvent>> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let events = outbox_events::table
            .filter(outbox_events::delivered_at.is_null())
            .filter(outbox_events::attempts.ge(max_attempts))
            .order(outbox_events::id.asc())
            .load::<OutboxEvent>(&mut conn)
            .await?;
        Ok(events)
    }
}

/// An open transaction pinned to one pooled connection.
pub struct PgInventoryTx {
    conn: PooledConnection<'static, AsyncPgConnection>,
}

#[async_trait]
impl InventoryTx for PgInventoryTx {
    async fn lock_product(&mut self, product_id: &str) -> Result<Option<Product>> {
        let product = products::table
            .find(product_id)
            .for_update()
            .first::<Product>(&mut *self.conn)
            .await
            .optional()?;
        Ok(product)
    }

    async fn decrement_stock(&mut self, product_id: &str, quantity: i32) -> Result<()> {
        diesel::update(products::table.find(product_id))
            .set(products::available_stock.eq(products::available_stock - quantity))
            .execute(&mut *self.conn)
            .await?;
        Ok(())
    }

    async fn insert_reservation(&mut self, record: &ReservationRecord) -> Result<()> {
        diesel::insert_into(reservations::table)
            .values(record)
            .execute(&mut *self.conn)
            .await
            .map_err(|e| match e {
                DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                    InventoryError::DuplicateReservation(record.order_id.clone())
                }
                other => other.into(),
            })?;
        Ok(())
    }

    async fn insert_outbox_event(&mut self, event: &NewOutboxEvent) -> Result<()> {
        diesel::insert_into(outbox_events::table)
            .values(event)
            .execute(&mut *self.conn)
            .await?;
        Ok(())
    }

    async fn fetch_due(&mut self, max_attempts: i32, limit: i64) -> Result<Vec<OutboxEvent>> {
        let events = outbox_events::table
            .filter(outbox_events::delivered_at.is_null())
            .filter(outbox_events::next_retry_at.le(Utc::now()))
            .filter(outbox_events::attempts.lt(max_attempts))
            .order(outbox_events::id.asc())
            .limit(limit)
            .for_update()
            .skip_locked()
            .load::<OutboxEvent>(&mut *self.conn)
            .await?;
        Ok(events)
    }

    async fn mark_delivered(&mut self, id: i64) -> Result<()> {
        diesel::update(outbox_events::table.find(id))
            .set((
                outbox_events::delivered_at.eq(Some(Utc::now())),
                outbox_events::last_error.eq(None::<String>),
            ))
            .execute(&mut *self.conn)
            .await?;
        Ok(())
    }

    async fn mark_failed(&mut self, id: i64, error: &str, backoff: Duration) -> Result<()> {
        let next_retry_at = now_plus(backoff);
        diesel::update(outbox_events::table.find(id))
            .set((
                outbox_events::attempts.eq(outbox_events::attempts + 1),
                outbox_events::last_error.eq(Some(error)),
                outbox_events::next_retry_at.eq(next_retry_at),
            ))
            .execute(&mut *self.conn)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut tx = *self;
        AnsiTransactionManager::commit_transaction(&mut *tx.conn).await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let mut tx = *self;
        AnsiTransactionManager::rollback_transaction(&mut *tx.conn).await?;
        Ok(())
    }
}
