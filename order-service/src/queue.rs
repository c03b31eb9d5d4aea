use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord};
use shared::ReserveTask;
use std::time::Duration;

use crate::error::{OrderError, Result};

/// At-least-once transport carrying reservation tasks to the inventory side.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: &ReserveTask) -> Result<()>;
}

pub struct KafkaTaskQueue {
    producer: FutureProducer,
    topic: String,
    timeout: Duration,
}

impl KafkaTaskQueue {
    pub fn new(producer: FutureProducer, topic: impl Into<String>, timeout: Duration) -> Self {
        Self { producer, topic: topic.into(), timeout }
    }
}

#[async_trait]
impl TaskQueue for KafkaTaskQueue {
    async fn enqueue(&self, task: &ReserveTask) -> Result<()> {
        let json = serde_json::to_string(task).map_err(|e| OrderError::Queue(e.to_string()))?;
        // Keyed by order so redeliveries of one order stay on one partition.
        let record = FutureRecord::to(&self.topic)
            .payload(&json)
            .key(&task.order_id);

        self.producer
            .send(record, self.timeout)
            .await
            .map_err(|(e, _)| OrderError::Queue(format!("Failed to publish task: {}", e)))?;

        Ok(())
    }
}
