//! Order lifecycle: create a PENDING order, hand the reservation to the
//! inventory side and settle the order once the decision is known.
//!
//! A decision reaches an order in one of three ways: the direct reserve call
//! returns it, the bounded poll finds it, or the inventory side's callback
//! pushes it. Whichever comes first wins; CONFIRMED and FAILED never change
//! afterwards. The optional reconciliation sweep settles orders that all
//! three missed.

use serde_json::Value;
use shared::clock::now_minus;
use shared::{non_empty, parse_quantity, OrderStatus, StatusCallback, ValidationError};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{OrderError, Result};
use crate::inventory::InventoryGateway;
use crate::models::{NewOrder, Order};
use crate::queue::TaskQueue;
use crate::store::OrderStore;

const OPEN: [OrderStatus; 2] = [OrderStatus::Pending, OrderStatus::Processing];

/// How reservation tasks leave this service.
#[derive(Clone)]
pub enum Dispatch {
    /// Synchronous call to the inventory task endpoint.
    Direct,
    /// Publish onto the task queue, then poll for the decision.
    Queued(Arc<dyn TaskQueue>),
}

impl Dispatch {
    pub fn is_queued(&self) -> bool {
        matches!(self, Dispatch::Queued(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// How long order creation waits for a queued decision.
    pub wait: Duration,
    pub poll_interval: Duration,
    pub callback_secret: Option<String>,
    /// Minimum age before the sweep looks at an unsettled order.
    pub reconcile_after: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            wait: Duration::from_millis(3000),
            poll_interval: Duration::from_millis(250),
            callback_secret: None,
            reconcile_after: Duration::from_millis(30_000),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateOrder {
    pub user_id: String,
    pub product_id: Option<String>,
    pub quantity: Option<Value>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderOutcome {
    Confirmed(Order),
    Rejected(Order),
    /// No decision yet; `queued` tells whether the task went through the queue.
    Processing { order: Order, queued: bool },
}

impl OrderOutcome {
    fn of(order: Order, queued: bool) -> Self {
        match order.status {
            OrderStatus::Confirmed => OrderOutcome::Confirmed(order),
            OrderStatus::Failed => OrderOutcome::Rejected(order),
            OrderStatus::Pending | OrderStatus::Processing => {
                OrderOutcome::Processing { order, queued }
            }
        }
    }

    pub fn order(&self) -> &Order {
        match self {
            OrderOutcome::Confirmed(order)
            | OrderOutcome::Rejected(order)
            | OrderOutcome::Processing { order, .. } => order,
        }
    }
}

pub struct OrderOrchestrator {
    store: Arc<dyn OrderStore>,
    gateway: Arc<dyn InventoryGateway>,
    dispatch: Dispatch,
    config: OrchestratorConfig,
}

impl OrderOrchestrator {
    pub fn new(
        store: Arc<dyn OrderStore>,
        gateway: Arc<dyn InventoryGateway>,
        dispatch: Dispatch,
        config: OrchestratorConfig,
    ) -> Self {
        Self { store, gateway, dispatch, config }
    }

    pub async fn create_order(&self, request: CreateOrder) -> Result<OrderOutcome> {
        let product_id =
            non_empty(request.product_id).ok_or(ValidationError::MissingField("product_id"))?;
        let raw = request.quantity.ok_or(ValidationError::MissingField("quantity"))?;
        let quantity = parse_quantity(&raw)?;
        let new_order = NewOrder::pending(
            request.user_id,
            product_id,
            quantity,
            non_empty(request.idempotency_key),
        );

        let order = self.find_or_insert(new_order).await?;
        if order.status.is_terminal() {
            info!(order_id = %order.order_id, status = %order.status, "returning settled order");
            return Ok(OrderOutcome::of(order, self.dispatch.is_queued()));
        }

        self.settle(order).await
    }

    /// Orders carrying an idempotency key that was already used resolve to
    /// the existing order instead of a new one.
    async fn find_or_insert(&self, new_order: NewOrder) -> Result<Order> {
        if let Some(key) = &new_order.idempotency_key {
            if let Some(existing) = self.store.find_by_idempotency_key(key).await? {
                info!(order_id = %existing.order_id, key = %key, "idempotency key reused");
                return Ok(existing);
            }
        }

        match self.store.insert(&new_order).await {
            Ok(order) => {
                info!(
                    order_id = %order.order_id,
                    user_id = %order.user_id,
                    product_id = %order.product_id,
                    quantity = order.quantity,
                    "order created"
                );
                Ok(order)
            }
            Err(OrderError::DuplicateIdempotencyKey(key)) => self
                .store
                .find_by_idempotency_key(&key)
                .await?
                .ok_or_else(|| OrderError::Storage(format!("order for key {key} vanished"))),
            Err(e) => Err(e),
        }
    }

    async fn settle(&self, order: Order) -> Result<OrderOutcome> {
        let task = order.reserve_task();

        match &self.dispatch {
            Dispatch::Direct => {
                let ack = self.gateway.reserve(&task).await.map_err(|e| {
                    warn!(order_id = %order.order_id, error = %e, "reserve failed, order stays pending");
                    e
                })?;
                let status = if ack.success { OrderStatus::Confirmed } else { OrderStatus::Failed };
                let order = self.apply_status(&order.order_id, status).await?;
                Ok(OrderOutcome::of(order, false))
            }
            Dispatch::Queued(queue) => {
                queue.enqueue(&task).await?;
                debug!(order_id = %order.order_id, "reservation task queued");
                self.wait_for_decision(&order.order_id).await
            }
        }
    }

    /// Polls until the order is settled or the wait deadline passes, in
    /// which case the order is moved to PROCESSING.
    async fn wait_for_decision(&self, order_id: &str) -> Result<OrderOutcome> {
        let deadline = Instant::now() + self.config.wait;

        loop {
            let current = self.get_order(order_id).await?;
            if current.status.is_terminal() {
                return Ok(OrderOutcome::of(current, true));
            }

            match self.gateway.find_reservation(order_id).await {
                Ok(Some(view)) => {
                    let order = self.apply_status(order_id, view.status.order_status()).await?;
                    return Ok(OrderOutcome::of(order, true));
                }
                Ok(None) => {}
                Err(e) => debug!(order_id, error = %e, "reservation poll failed"),
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            time::sleep(self.config.poll_interval.min(deadline - now)).await;
        }

        if self
            .store
            .update_status(order_id, OrderStatus::Processing, &[OrderStatus::Pending])
            .await?
            .is_some()
        {
            info!(order_id, "no decision before deadline, order left processing");
        }
        let current = self.get_order(order_id).await?;
        Ok(OrderOutcome::of(current, true))
    }

    /// Moves an open order to a terminal status. Settled orders are never
    /// changed; a contradicting status is logged and dropped.
    pub async fn apply_status(&self, order_id: &str, status: OrderStatus) -> Result<Order> {
        if let Some(updated) = self.store.update_status(order_id, status, &OPEN).await? {
            info!(order_id, status = %status, "order resolved");
            return Ok(updated);
        }

        let current = self.get_order(order_id).await?;
        if current.status == status {
            debug!(order_id, status = %status, "status already applied");
        } else {
            warn!(
                order_id,
                current = %current.status,
                incoming = %status,
                "ignoring status for settled order"
            );
        }
        Ok(current)
    }

    pub async fn get_order(&self, order_id: &str) -> Result<Order> {
        self.store
            .find(order_id)
            .await?
            .ok_or_else(|| OrderError::NotFound(order_id.to_string()))
    }

    /// Fails unless `token` matches the configured secret. Without a
    /// configured secret every callback is rejected.
    pub fn verify_callback_token(&self, token: Option<&str>) -> Result<()> {
        match (self.config.callback_secret.as_deref(), token) {
            (Some(secret), Some(token)) if secret == token => Ok(()),
            _ => {
                warn!("callback rejected: bad token");
                Err(OrderError::Unauthorized)
            }
        }
    }

    /// Applies a status pushed by the inventory side.
    pub async fn handle_callback(
        &self,
        order_id: &str,
        token: Option<&str>,
        callback: &StatusCallback,
    ) -> Result<Order> {
        self.verify_callback_token(token)?;
        let status = callback.terminal_status()?;
        self.apply_status(order_id, status).await
    }

    /// One sweep over orders that stayed open longer than `reconcile_after`.
    /// Returns how many of them were settled.
    pub async fn reconcile_once(&self) -> Result<usize> {
        let open = self.store.list_unresolved(now_minus(self.config.reconcile_after)).await?;

        let mut settled = 0;
        for order in &open {
            match self.reconcile(order).await {
                Ok(true) => settled += 1,
                Ok(false) => {}
                Err(e) => warn!(order_id = %order.order_id, error = %e, "reconciliation failed"),
            }
        }

        if !open.is_empty() {
            info!(open = open.len(), settled, "reconciliation pass finished");
        }
        Ok(settled)
    }

    async fn reconcile(&self, order: &Order) -> Result<bool> {
        if let Some(view) = self.gateway.find_reservation(&order.order_id).await? {
            self.apply_status(&order.order_id, view.status.order_status()).await?;
            return Ok(true);
        }

        info!(order_id = %order.order_id, "no decision recorded, dispatching again");
        let task = order.reserve_task();
        match &self.dispatch {
            Dispatch::Direct => {
                let ack = self.gateway.reserve(&task).await?;
                let status = if ack.success { OrderStatus::Confirmed } else { OrderStatus::Failed };
                self.apply_status(&order.order_id, status).await?;
                Ok(true)
            }
            Dispatch::Queued(queue) => {
                queue.enqueue(&task).await?;
                Ok(false)
            }
        }
    }

    pub async fn run_reconciler(&self, every: Duration, cancel: CancellationToken) {
        let mut interval = time::interval(every);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = interval.tick() => {
                    if let Err(e) = self.reconcile_once().await {
                        error!("Error reconciling orders: {}", e);
                    }
                }
            }
        }
    }

    pub fn spawn_reconciler(self: Arc<Self>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run_reconciler(every, cancel).await })
    }
}
