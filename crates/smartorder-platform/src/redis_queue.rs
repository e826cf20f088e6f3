use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use smartorder_core::{DeadLetterEntry, MessageQueue, ProcessingGuard};

pub const CLAIM_TTL_SECS: u64 = 300;
pub const PROCESSED_TTL_SECS: u64 = 86_400;

pub fn claim_key(id: &str) -> String {
    format!("processing:{id}")
}

pub fn processed_key(id: &str) -> String {
    format!("processed_message:{id}")
}

/// Ingestion list consumed with BRPOP and fed with LPUSH, a dead-letter
/// list, and the per-message dedup markers.
#[derive(Clone)]
pub struct RedisQueue {
    client: Client,
    queue_key: String,
    dead_letter_key: String,
}

impl RedisQueue {
    pub fn connect(redis_url: &str, queue_key: &str, dead_letter_key: &str) -> Result<Self> {
        let client = Client::open(redis_url).context("invalid REDIS_URL")?;
        Ok(Self {
            client,
            queue_key: queue_key.to_string(),
            dead_letter_key: dead_letter_key.to_string(),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .context("failed to connect to redis")
    }
}

#[async_trait]
impl MessageQueue for RedisQueue {
    async fn dequeue(&self, wait: Duration) -> Result<Option<String>> {
        let mut connection = self.connection().await?;
        let popped: Option<(String, String)> = connection.brpop(&self.queue_key, wait.as_secs_f64()).await?;
        Ok(popped.map(|(_, raw)| raw))
    }

    async fn enqueue(&self, raw: &str) -> Result<()> {
        let mut connection = self.connection().await?;
        let _: i64 = connection.lpush(&self.queue_key, raw).await?;
        Ok(())
    }

    async fn dead_letter(&self, entry: &DeadLetterEntry) -> Result<()> {
        let mut connection = self.connection().await?;
        let serialized = serde_json::to_string(entry)?;
        let _: i64 = connection.lpush(&self.dead_letter_key, serialized).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut connection = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut connection).await?;
        Ok(())
    }
}

#[async_trait]
impl ProcessingGuard for RedisQueue {
    async fn is_processed(&self, key: &str) -> Result<bool> {
        let mut connection = self.connection().await?;
        let exists: bool = connection.exists(processed_key(key)).await?;
        Ok(exists)
    }

    async fn try_claim(&self, key: &str, worker_id: usize) -> Result<bool> {
        let mut connection = self.connection().await?;
        let claimed: Option<String> = redis::cmd("SET")
            .arg(claim_key(key))
            .arg(worker_id)
            .arg("NX")
            .arg("EX")
            .arg(CLAIM_TTL_SECS)
            .query_async(&mut connection)
            .await?;
        Ok(claimed.is_some())
    }

    async fn release(&self, key: &str) -> Result<()> {
        let mut connection = self.connection().await?;
        let _: i64 = connection.del(claim_key(key)).await?;
        Ok(())
    }

    async fn mark_processed(&self, key: &str) -> Result<()> {
        let mut connection = self.connection().await?;
        let _: () = connection.set_ex(processed_key(key), 1, PROCESSED_TTL_SECS).await?;
        Ok(())
    }
}
