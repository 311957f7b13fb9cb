//! Redis-based job queue with reliable dequeue.
//!
//! Producers push review jobs onto a Redis list; the worker consumes
//! them with BRPOPLPUSH so every in-flight job also sits on a
//! processing list until acknowledged.
//!
//! # Queue Structure
//!
//! - `{queue_name}`: Main queue where jobs are enqueued
//! - `{queue_name}:processing`: Jobs being processed (for crash recovery)
//!
//! # Reliability
//!
//! Jobs are atomically moved to the processing list when dequeued and
//! removed from it once handled. If the worker crashes mid-job, startup
//! recovery pushes leftover processing entries back onto the main
//! queue. Payloads that do not parse as jobs are discarded at dequeue
//! so one bad producer cannot wedge the queue.

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use thiserror::Error;
use tracing::warn;

use super::job::Job;

/// Attempts made to reach Redis before startup gives up.
const CONNECT_ATTEMPTS: u32 = 5;

/// Fixed delay between startup connection attempts.
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Failed to connect to Redis.
    #[error("Redis connection failed: {0}")]
    ConnectionFailed(String),

    /// Redis stayed unreachable through every startup attempt.
    #[error("Redis connection failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// Redis operation failed.
    #[error("Redis operation failed: {0}")]
    RedisError(#[from] redis::RedisError),

    /// Failed to serialize job data.
    #[error("Serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// Dequeued payload did not parse as a job and was discarded.
    #[error("Discarded malformed job payload: {0}")]
    MalformedPayload(String),
}

/// A dequeued job together with the raw payload it came from.
///
/// Acknowledgment removes the raw string from the processing list, so
/// it must stay byte-identical to what BRPOPLPUSH moved there.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub job: Job,
    raw: String,
}

/// Redis-based job queue with reliable dequeue.
pub struct JobQueue {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
    /// Name of the main queue.
    queue_name: String,
    /// Name of the processing list.
    processing_queue: String,
}

impl JobQueue {
    /// Connects to Redis and creates a new job queue.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    /// * `queue_name` - Name of the queue (used as prefix for Redis keys)
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ConnectionFailed` if the connection fails.
    pub async fn connect(redis_url: &str, queue_name: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            redis,
            queue_name: queue_name.to_string(),
            processing_queue: format!("{}:processing", queue_name),
        })
    }

    /// Connects to Redis, retrying a fixed number of times.
    ///
    /// Meant for process startup, where Redis may still be coming up
    /// alongside this service.
    pub async fn connect_with_retry(redis_url: &str, queue_name: &str) -> Result<Self, QueueError> {
        let mut last_error = String::new();

        for attempt in 1..=CONNECT_ATTEMPTS {
            match Self::connect(redis_url, queue_name).await {
                Ok(queue) => return Ok(queue),
                Err(e) => {
                    last_error = e.to_string();
                    warn!(
                        attempt,
                        remaining = CONNECT_ATTEMPTS - attempt,
                        error = %last_error,
                        "Redis connection attempt failed"
                    );
                    if attempt < CONNECT_ATTEMPTS {
                        tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                    }
                }
            }
        }

        Err(QueueError::RetriesExhausted {
            attempts: CONNECT_ATTEMPTS,
            last_error,
        })
    }

    /// Enqueues a new job.
    ///
    /// Jobs are added to the left of the queue (LPUSH) so they can be
    /// dequeued from the right in FIFO order.
    pub async fn enqueue(&self, job: &Job) -> Result<(), QueueError> {
        let serialized = serde_json::to_string(job)?;
        let mut conn = self.redis.clone();
        conn.lpush::<_, _, ()>(&self.queue_name, serialized).await?;
        Ok(())
    }

    /// Dequeues the next job, blocking until one is available or timeout.
    ///
    /// Uses BRPOPLPUSH to atomically move the payload from the main
    /// queue to the processing list, so a crash between dequeue and
    /// acknowledgment leaves the payload recoverable.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(queued))` if a job was dequeued
    /// - `Ok(None)` if the timeout expired with no jobs available
    /// - `Err(QueueError::MalformedPayload)` if the payload was dropped
    pub async fn dequeue(&self, timeout: Duration) -> Result<Option<QueuedJob>, QueueError> {
        let mut conn = self.redis.clone();
        let timeout_secs = timeout.as_secs().max(1) as usize;

        // BRPOPLPUSH atomically pops from source and pushes to destination
        let result: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(&self.queue_name)
            .arg(&self.processing_queue)
            .arg(timeout_secs)
            .query_async(&mut conn)
            .await?;

        let Some(raw) = result else {
            return Ok(None);
        };

        match serde_json::from_str::<Job>(&raw) {
            Ok(job) => Ok(Some(QueuedJob { job, raw })),
            Err(e) => {
                // Drop the payload from the processing list so recovery
                // does not resurrect it.
                if let Err(lrem_err) = conn
                    .lrem::<_, _, ()>(&self.processing_queue, 1, &raw)
                    .await
                {
                    warn!(
                        error = %lrem_err,
                        "Failed to drop malformed payload from processing list"
                    );
                }
                Err(QueueError::MalformedPayload(e.to_string()))
            }
        }
    }

    /// Acknowledges a handled job, removing it from the processing list.
    pub async fn ack(&self, queued: &QueuedJob) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        conn.lrem::<_, _, ()>(&self.processing_queue, 1, &queued.raw)
            .await?;
        Ok(())
    }

    /// Recovers payloads stuck on the processing list.
    ///
    /// Called on startup so jobs from a crashed run are retried before
    /// new work. Entries go to the front of the main queue.
    ///
    /// # Returns
    ///
    /// The number of payloads recovered.
    pub async fn recover_pending(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let mut recovered = 0;

        let payloads: Vec<String> = conn.lrange(&self.processing_queue, 0, -1).await?;

        for payload in payloads {
            // Atomically remove from processing and requeue at the front
            let mut pipe = redis::pipe();
            pipe.atomic()
                .lrem(&self.processing_queue, 1, &payload)
                .rpush(&self.queue_name, &payload);
            pipe.query_async::<_, ()>(&mut conn).await?;

            recovered += 1;
        }

        Ok(recovered)
    }

    /// Returns the number of jobs in the main queue.
    pub async fn len(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(&self.queue_name).await?;
        Ok(len)
    }

    /// Returns the number of jobs currently being processed.
    pub async fn processing_len(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(&self.processing_queue).await?;
        Ok(len)
    }

    /// Returns whether the main queue is empty.
    pub async fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len().await? == 0)
    }

    /// Returns the queue name.
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }
}
