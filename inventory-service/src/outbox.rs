//! Transactional outbox: enqueueing status events alongside a reservation
//! decision, and the dispatcher that pushes them to the order side.

use async_trait::async_trait;
use shared::retry::with_deadline;
use shared::{OrderStatus, StatusCallback, CALLBACK_TOKEN_HEADER};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{InventoryError, Result};
use crate::models::{NewOutboxEvent, OutboxEvent};
use crate::store::{InventoryStore, InventoryTx};

/// Writes one status event inside the caller's transaction.
pub async fn enqueue(tx: &mut dyn InventoryTx, order_id: &str, status: OrderStatus) -> Result<()> {
    tx.insert_outbox_event(&NewOutboxEvent {
        order_id: order_id.to_string(),
        order_status: status,
    })
    .await
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxConfig {
    /// Fixed delay before a failed event becomes due again.
    pub retry_interval: Duration,
    pub max_attempts: i32,
    pub batch_size: i64,
    /// How often the background scheduler runs a pass.
    pub poll_interval: Duration,
    /// Deadline for a single callback.
    pub delivery_timeout: Duration,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_millis(5000),
            max_attempts: 10,
            batch_size: 25,
            poll_interval: Duration::from_millis(5000),
            delivery_timeout: Duration::from_millis(2000),
        }
    }
}

/// Delivers a terminal status for an order to the order side.
#[async_trait]
pub trait CallbackSender: Send + Sync {
    async fn send(&self, order_id: &str, status: OrderStatus) -> Result<()>;
}

/// Posts `{status}` to `{base_url}/api/orders/{order_id}/status` with the
/// shared secret in the callback token header.
pub struct HttpCallbackSender {
    client: reqwest::Client,
    base_url: Option<String>,
    secret: Option<String>,
}

impl HttpCallbackSender {
    pub fn new(base_url: Option<String>, secret: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InventoryError::Delivery(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.map(|url| url.trim_end_matches('/').to_string()),
            secret,
        })
    }
}

#[async_trait]
impl CallbackSender for HttpCallbackSender {
    async fn send(&self, order_id: &str, status: OrderStatus) -> Result<()> {
        let (Some(base_url), Some(secret)) = (&self.base_url, &self.secret) else {
            return Err(InventoryError::Delivery(
                "missing ORDER_SERVICE_URL or ORDER_CALLBACK_SECRET".to_string(),
            ));
        };

        let response = self
            .client
            .post(format!("{base_url}/api/orders/{order_id}/status"))
            .header(CALLBACK_TOKEN_HEADER, secret)
            .json(&StatusCallback::new(status))
            .send()
            .await
            .map_err(|e| InventoryError::Delivery(e.to_string()))?;

        let code = response.status();
        if !code.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InventoryError::Delivery(format!("callback failed: {code} {body}")));
        }
        Ok(())
    }
}

pub struct OutboxDispatcher {
    store: Arc<dyn InventoryStore>,
    sender: Arc<dyn CallbackSender>,
    config: OutboxConfig,
    wake: Notify,
}

impl OutboxDispatcher {
    pub fn new(
        store: Arc<dyn InventoryStore>,
        sender: Arc<dyn CallbackSender>,
        config: OutboxConfig,
    ) -> Self {
        Self { store, sender, config, wake: Notify::new() }
    }

    pub fn config(&self) -> &OutboxConfig {
        &self.config
    }

    /// Asks the scheduler for an early pass. Wake-ups that arrive while a
    /// pass is running collapse into a single follow-up pass.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Claims up to `limit` due events, tries each once and records the
    /// outcome. Returns how many events were attempted.
    ///
    /// A failed delivery never aborts the batch; all bookkeeping commits
    /// together at the end.
    pub async fn process_once(&self, limit: i64) -> Result<usize> {
        let mut tx = self.store.begin().await?;

        match self.dispatch_batch(tx.as_mut(), limit).await {
            Ok(attempted) => {
                tx.commit().await?;
                Ok(attempted)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    error!(error = %rollback_err, "outbox rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn dispatch_batch(&self, tx: &mut dyn InventoryTx, limit: i64) -> Result<usize> {
        let events = tx.fetch_due(self.config.max_attempts, limit).await?;
        if events.is_empty() {
            return Ok(0);
        }

        let mut delivered = 0;
        for event in &events {
            match self.deliver(event).await {
                Ok(()) => {
                    tx.mark_delivered(event.id).await?;
                    delivered += 1;
                    info!(id = event.id, order_id = %event.order_id, status = %event.order_status, "outbox event delivered");
                }
                Err(reason) => {
                    tx.mark_failed(event.id, &reason, self.config.retry_interval).await?;
                    let attempts = event.attempts + 1;
                    if attempts >= self.config.max_attempts {
                        warn!(id = event.id, order_id = %event.order_id, attempts, error = %reason, "outbox event exhausted its attempts");
                    } else {
                        warn!(id = event.id, order_id = %event.order_id, attempts, error = %reason, "outbox delivery failed");
                    }
                }
            }
        }

        info!(attempted = events.len(), delivered, "outbox pass finished");
        Ok(events.len())
    }

    async fn deliver(&self, event: &OutboxEvent) -> std::result::Result<(), String> {
        with_deadline(
            self.config.delivery_timeout,
            self.sender.send(&event.order_id, event.order_status),
        )
        .await
        .map_err(|e| e.to_string())
    }

    /// Runs a pass every `poll_interval`, or sooner when woken, until
    /// `cancel` fires. Passes never overlap.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = time::interval(self.config.poll_interval.max(Duration::from_millis(1)));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("outbox scheduler stopped");
                    return;
                }
                _ = interval.tick() => {}
                _ = self.wake.notified() => {
                    debug!("outbox scheduler woken");
                }
            }

            if let Err(e) = self.process_once(self.config.batch_size).await {
                error!("Error processing outbox events: {}", e);
            }
        }
    }

    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }
}
