use std::time::Duration;

use async_trait::async_trait;
use redis::streams::{StreamAutoClaimReply, StreamId, StreamReadReply};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Job notification payload serialized into the broker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedJob {
    pub job_id: Uuid,
}

/// One delivery of a job notification. Unacknowledged deliveries are handed
/// out again once they have been idle for longer than the lease.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub job_id: Uuid,
    pub handle: String,
}

/// At-least-once job notification transport.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job_id: Uuid) -> Result<(), QueueError>;

    /// Wait up to `timeout` for the next delivery.
    async fn dequeue(&self, timeout: Duration) -> Result<Option<Delivery>, QueueError>;

    /// The delivery is fully handled; never deliver it again.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Give the delivery back for immediate redelivery.
    async fn nack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Reset the delivery's idle clock so it is not redelivered while its
    /// holder is still working.
    async fn touch(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Number of notifications in the broker (delivered or not).
    async fn depth(&self) -> Result<u64, QueueError>;

    async fn health_check(&self) -> Result<(), QueueError>;
}

/// Redis Streams consumer-group queue.
pub struct RedisJobQueue {
    client: redis::Client,
    stream: String,
    group: String,
    consumer: String,
    lease: Duration,
}

impl RedisJobQueue {
    pub fn new(
        redis_url: &str,
        stream: impl Into<String>,
        group: impl Into<String>,
        lease: Duration,
    ) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            stream: stream.into(),
            group: group.into(),
            consumer: format!("consumer-{}-{}", std::process::id(), Uuid::new_v4().simple()),
            lease,
        })
    }

    /// Create the consumer group (and stream) if missing.
    pub async fn init(&self) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => info!(group = %self.group, "Created consumer group"),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(group = %self.group, "Consumer group already exists");
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }
        Ok(())
    }

    /// Decode a stream entry; malformed entries are acked and dropped.
    async fn decode(&self, entry: &StreamId) -> Result<Option<Delivery>, QueueError> {
        let parsed = entry
            .get::<String>("job")
            .ok_or_else(|| QueueError::Malformed("missing job field".to_string()))
            .and_then(|payload| {
                serde_json::from_str::<QueuedJob>(&payload).map_err(QueueError::Serialize)
            });

        match parsed {
            Ok(job) => Ok(Some(Delivery {
                job_id: job.job_id,
                handle: entry.id.clone(),
            })),
            Err(e) => {
                warn!(message_id = %entry.id, error = %e, "Dropping malformed queue entry");
                self.ack_id(&entry.id).await?;
                Ok(None)
            }
        }
    }

    async fn ack_id(&self, message_id: &str) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        redis::cmd("XACK")
            .arg(&self.stream)
            .arg(&self.group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        conn.xdel::<_, _, ()>(&self.stream, &[message_id]).await?;
        Ok(())
    }

    /// Take over one entry whose holder went quiet for longer than the lease.
    async fn reclaim_idle(&self) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let reply: StreamAutoClaimReply = redis::cmd("XAUTOCLAIM")
            .arg(&self.stream)
            .arg(&self.group)
            .arg(&self.consumer)
            .arg(self.lease.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(1)
            .query_async(&mut conn)
            .await?;

        for entry in &reply.claimed {
            if let Some(delivery) = self.decode(entry).await? {
                info!(job_id = %delivery.job_id, message_id = %delivery.handle, "Reclaimed idle delivery");
                return Ok(Some(delivery));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job_id: Uuid) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(&QueuedJob { job_id })?;

        let message_id: String = conn.xadd(&self.stream, "*", &[("job", payload)]).await?;
        debug!(job_id = %job_id, message_id = %message_id, "Enqueued job");
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<Delivery>, QueueError> {
        if let Some(delivery) = self.reclaim_idle().await? {
            return Ok(Some(delivery));
        }

        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(timeout.as_millis().max(1) as u64)
            .arg("STREAMS")
            .arg(&self.stream)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let Some(reply) = reply else {
            return Ok(None);
        };

        for key in &reply.keys {
            for entry in &key.ids {
                if let Some(delivery) = self.decode(entry).await? {
                    return Ok(Some(delivery));
                }
            }
        }
        Ok(None)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.ack_id(&delivery.handle).await?;
        debug!(job_id = %delivery.job_id, message_id = %delivery.handle, "Acknowledged delivery");
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.enqueue(delivery.job_id).await?;
        self.ack_id(&delivery.handle).await
    }

    async fn touch(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        // Re-claiming an entry to ourselves resets its idle time.
        redis::cmd("XCLAIM")
            .arg(&self.stream)
            .arg(&self.group)
            .arg(&self.consumer)
            .arg(0)
            .arg(&delivery.handle)
            .arg("JUSTID")
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let depth: u64 = conn.xlen(&self.stream).await?;
        Ok(depth)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Malformed queue entry: {0}")]
    Malformed(String),
}
