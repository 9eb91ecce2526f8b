//! Redis-backed queue store.
//!
//! Each queue is a Redis list. Producers `LPUSH`, so the left end is the tail
//! and the right end is the head; claiming is `LMOVE <src> <dst> RIGHT LEFT`,
//! which Redis executes atomically.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use tracing::info;

use super::store::QueueStore;
use super::types::Job;
use crate::error::QueueError;

/// Queue store over a Redis `ConnectionManager`.
///
/// The manager reconnects on its own after a dropped connection; calls made
/// while it is down fail with `QueueError::Unavailable`.
#[derive(Clone)]
pub struct RedisQueue {
    manager: ConnectionManager,
}

impl RedisQueue {
    /// Connect to Redis and verify the connection with `PING`.
    pub async fn connect(url: &str) -> Result<Self, QueueError> {
        info!(url_length = url.len(), "redis_connecting");

        let client = Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;

        let mut conn = manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        info!("redis_connected");
        Ok(Self { manager })
    }
}

#[async_trait]
impl QueueStore for RedisQueue {
    async fn push(&self, queue: &str, job: &Job) -> Result<(), QueueError> {
        let mut conn = self.manager.clone();
        let _: i64 = redis::cmd("LPUSH")
            .arg(queue)
            .arg(job.as_str())
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn atomic_move(&self, source: &str, dest: &str) -> Result<Option<Job>, QueueError> {
        let mut conn = self.manager.clone();
        let moved: Option<String> = redis::cmd("LMOVE")
            .arg(source)
            .arg(dest)
            .arg("RIGHT")
            .arg("LEFT")
            .query_async(&mut conn)
            .await?;
        Ok(moved.map(Job::from))
    }

    async fn remove(&self, queue: &str, job: &Job, count: usize) -> Result<usize, QueueError> {
        let mut conn = self.manager.clone();
        let removed: i64 = redis::cmd("LREM")
            .arg(queue)
            .arg(count)
            .arg(job.as_str())
            .query_async(&mut conn)
            .await?;
        Ok(removed.max(0) as usize)
    }

    async fn len(&self, queue: &str) -> Result<usize, QueueError> {
        let mut conn = self.manager.clone();
        let len: i64 = redis::cmd("LLEN").arg(queue).query_async(&mut conn).await?;
        Ok(len.max(0) as usize)
    }
}
