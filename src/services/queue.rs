use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use crate::models::notification::ProviderJobStatus;

const QUEUE_KEY: &str = "media_recognition:completions";
const PROCESSING_KEY: &str = "media_recognition:processing";

/// Authenticated job completion waiting for its results to be fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionTask {
    pub job_id: String,
    pub status: ProviderJobStatus,
    /// SNS message id of the delivery that produced this task
    pub message_id: String,
}

/// Hand-off between the webhook endpoint and the result worker.
#[async_trait]
pub trait CompletionQueue: Send + Sync {
    async fn enqueue(&self, task: &CompletionTask) -> Result<(), QueueError>;

    /// Take the next task, moving it to the in-flight list.
    async fn dequeue(&self) -> Result<Option<CompletionTask>, QueueError>;

    /// Drop a task from the in-flight list.
    async fn complete(&self, task: &CompletionTask) -> Result<(), QueueError>;

    async fn depth(&self) -> Result<u64, QueueError>;

    async fn ping(&self) -> Result<(), QueueError>;
}

/// Redis-backed completion queue.
pub struct RedisCompletionQueue {
    client: redis::Client,
}

impl RedisCompletionQueue {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait]
impl CompletionQueue for RedisCompletionQueue {
    async fn enqueue(&self, task: &CompletionTask) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(task)?;
        conn.lpush::<_, _, ()>(QUEUE_KEY, &payload).await?;
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<CompletionTask>, QueueError> {
        let mut conn = self.connection().await?;
        let result: Option<String> = conn.rpoplpush(QUEUE_KEY, PROCESSING_KEY).await?;

        match result {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    async fn complete(&self, task: &CompletionTask) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(task)?;
        conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &payload).await?;
        Ok(())
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let depth: u64 = conn.llen(QUEUE_KEY).await?;
        Ok(depth)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

/// In-process queue for tests and single-binary deployments.
#[derive(Default)]
pub struct MemoryCompletionQueue {
    pending: Mutex<VecDeque<CompletionTask>>,
    in_flight: Mutex<Vec<CompletionTask>>,
}

impl MemoryCompletionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl CompletionQueue for MemoryCompletionQueue {
    async fn enqueue(&self, task: &CompletionTask) -> Result<(), QueueError> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(task.clone());
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<CompletionTask>, QueueError> {
        let task = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        if let Some(task) = &task {
            self.in_flight
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(task.clone());
        }
        Ok(task)
    }

    async fn complete(&self, task: &CompletionTask) -> Result<(), QueueError> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pos) = in_flight.iter().position(|t| t == task) {
            in_flight.remove(pos);
        }
        Ok(())
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        Ok(pending.len() as u64)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
