//! Kafka consumer feeding reservation tasks into the ingress.
//!
//! An offset is committed only once its message is settled: the engine
//! decided, or the payload was unusable. Infrastructure failures keep the
//! message in hand and it is handled again after `redelivery_delay`, so the
//! partition does not advance past an undecided task.

use futures::StreamExt;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::Message;
use shared::retry::{retry, RetryPolicy};
use shared::{ReserveTaskAck, ReserveTaskPayload};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::ingress::TaskIngress;

/// What became of one task message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Acked(ReserveTaskAck),
    /// Malformed payload. Never retried.
    Dropped,
    /// The engine could not decide. The message must not be committed.
    Retry,
}

impl TaskOutcome {
    pub fn commits(&self) -> bool {
        !matches!(self, TaskOutcome::Retry)
    }
}

pub struct TaskConsumer {
    ingress: TaskIngress,
    retry: RetryPolicy,
    redelivery_delay: Duration,
}

impl TaskConsumer {
    pub fn new(ingress: TaskIngress, retry: RetryPolicy, redelivery_delay: Duration) -> Self {
        Self { ingress, retry, redelivery_delay }
    }

    pub async fn run(&self, consumer: StreamConsumer) {
        let mut message_stream = consumer.stream();

        while let Some(message) = message_stream.next().await {
            match message {
                Ok(m) => {
                    match m.payload_view::<str>() {
                        Some(Ok(json_str)) => {
                            self.settle(json_str).await;
                        }
                        Some(Err(e)) => error!("Error parsing payload: {}", e),
                        None => warn!(offset = m.offset(), "empty task message"),
                    }
                    if let Err(e) = consumer.commit_message(&m, CommitMode::Async) {
                        error!("Error committing message: {}", e);
                    }
                }
                Err(e) => error!("Error receiving message: {}", e),
            }
        }
    }

    /// Handles one message until it is acked or dropped. Infrastructure
    /// failures are retried without bound.
    pub async fn settle(&self, json_str: &str) -> TaskOutcome {
        loop {
            let outcome = self.handle_payload(json_str).await;
            if outcome.commits() {
                return outcome;
            }
            warn!(delay_ms = self.redelivery_delay.as_millis() as u64, "task not decided, handling it again");
            tokio::time::sleep(self.redelivery_delay).await;
        }
    }

    /// Handles one raw task message with the bounded retry policy.
    pub async fn handle_payload(&self, json_str: &str) -> TaskOutcome {
        let task = match serde_json::from_str::<ReserveTaskPayload>(json_str)
            .map_err(|e| e.to_string())
            .and_then(|payload| payload.validate().map_err(|e| e.to_string()))
        {
            Ok(task) => task,
            Err(e) => {
                warn!(error = %e, "dropping malformed task");
                return TaskOutcome::Dropped;
            }
        };

        match retry(&self.retry, || self.ingress.process(&task)).await {
            Ok(ack) => {
                info!(order_id = %ack.order_id, success = ack.success, replay = ack.replay, "task processed");
                TaskOutcome::Acked(ack)
            }
            Err(e) => {
                error!(order_id = %task.order_id, error = %e, "task failed after retries");
                TaskOutcome::Retry
            }
        }
    }
}
