//! Redis-backed job queue with a visibility timeout.
//!
//! # Keys
//!
//! - `{name}`: pending jobs, pushed on the left and popped from the right
//! - `{name}:processing`: jobs received but not yet deleted
//! - `{name}:active`: sorted set of received job ids scored by the time (ms)
//!   at which they become visible again
//!
//! Every entry is stored as an [`Envelope`] so identical payloads keep
//! distinct ids. Raw payloads pushed by other producers are wrapped when
//! they are first received. Jobs that stay in `{name}:processing` past their
//! deadline are moved back to the consuming end of `{name}` on the next
//! receive.

use async_trait::async_trait;
use chrono::Utc;
use pagebuild_core::{Error, QueueMessage, QueueSource, Result};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

fn queue_error(err: redis::RedisError) -> Error {
    Error::Queue(err.to_string())
}

/// A queued payload tagged with its own id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    pub id: String,
    pub body: String,
}

impl Envelope {
    pub fn wrap(body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            body: body.into(),
        }
    }

    /// Parse a stored entry, wrapping anything that is not an envelope.
    pub fn decode(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_else(|_| Self::wrap(raw))
    }

    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Queue(e.to_string()))
    }
}

/// Processing entries whose envelope id is in `expired`, in list order.
fn select_expired(processing: Vec<String>, expired: &HashSet<String>) -> Vec<(String, Envelope)> {
    processing
        .into_iter()
        .filter_map(|raw| {
            let envelope: Envelope = serde_json::from_str(&raw).ok()?;
            expired
                .contains(&envelope.id)
                .then_some((raw, envelope))
        })
        .collect()
}

pub struct RedisQueue {
    /// Used for everything except the blocking pop.
    redis: ConnectionManager,
    /// Dedicated to BRPOPLPUSH so a blocked poll does not stall other commands.
    blocking: ConnectionManager,
    name: String,
    processing_key: String,
    active_key: String,
    poll_timeout: Duration,
    visibility_timeout: Duration,
}

impl RedisQueue {
    pub async fn connect(
        redis_url: &str,
        name: &str,
        poll_timeout: Duration,
        visibility_timeout: Duration,
    ) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| Error::Queue(format!("Redis connection failed: {}", e)))?;
        let redis = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| Error::Queue(format!("Redis connection failed: {}", e)))?;
        let blocking = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::Queue(format!("Redis connection failed: {}", e)))?;

        Ok(Self {
            redis,
            blocking,
            name: name.to_string(),
            processing_key: format!("{}:processing", name),
            active_key: format!("{}:active", name),
            poll_timeout,
            visibility_timeout,
        })
    }

    /// Enqueue a raw JSON payload and return its job id.
    pub async fn push(&self, body: &str) -> Result<String> {
        let envelope = Envelope::wrap(body);
        let mut conn = self.redis.clone();
        conn.lpush::<_, _, ()>(&self.name, envelope.encode()?)
            .await
            .map_err(queue_error)?;
        Ok(envelope.id)
    }

    /// Return expired deliveries to the consuming end of the queue.
    async fn reclaim_expired(&self, now_ms: i64) -> Result<()> {
        let mut conn = self.redis.clone();
        let expired: Vec<String> = conn
            .zrangebyscore(&self.active_key, "-inf", now_ms)
            .await
            .map_err(queue_error)?;
        if expired.is_empty() {
            return Ok(());
        }

        let mut expired: HashSet<String> = expired.into_iter().collect();
        let processing: Vec<String> = conn
            .lrange(&self.processing_key, 0, -1)
            .await
            .map_err(queue_error)?;

        for (raw, envelope) in select_expired(processing, &expired) {
            warn!(queue = %self.name, id = %envelope.id, "Job visibility timed out, making it available again");
            let mut pipe = redis::pipe();
            pipe.atomic()
                .lrem(&self.processing_key, 1, &raw)
                .ignore()
                .rpush(&self.name, &raw)
                .ignore()
                .zrem(&self.active_key, &envelope.id)
                .ignore();
            pipe.query_async::<_, ()>(&mut conn)
                .await
                .map_err(queue_error)?;
            expired.remove(&envelope.id);
        }

        // Deadlines left over from jobs deleted between the two reads.
        if !expired.is_empty() {
            let stale: Vec<String> = expired.into_iter().collect();
            conn.zrem::<_, _, ()>(&self.active_key, stale)
                .await
                .map_err(queue_error)?;
        }
        Ok(())
    }
}

#[async_trait]
impl QueueSource for RedisQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn receive_message(&self) -> Result<Option<QueueMessage>> {
        self.reclaim_expired(Utc::now().timestamp_millis()).await?;

        // A zero timeout would block forever.
        let timeout_secs = self.poll_timeout.as_secs().max(1) as usize;
        let mut conn = self.blocking.clone();
        let raw: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(&self.name)
            .arg(&self.processing_key)
            .arg(timeout_secs)
            .query_async(&mut conn)
            .await
            .map_err(queue_error)?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        let envelope = Envelope::decode(&raw);
        let receipt = envelope.encode()?;
        let deadline = Utc::now().timestamp_millis() + self.visibility_timeout.as_millis() as i64;

        let mut pipe = redis::pipe();
        pipe.atomic();
        if receipt != raw {
            pipe.lrem(&self.processing_key, 1, &raw)
                .ignore()
                .lpush(&self.processing_key, &receipt)
                .ignore();
        }
        pipe.zadd(&self.active_key, &envelope.id, deadline).ignore();
        let mut conn = self.redis.clone();
        pipe.query_async::<_, ()>(&mut conn)
            .await
            .map_err(queue_error)?;

        debug!(queue = %self.name, id = %envelope.id, "Received job");
        Ok(Some(QueueMessage {
            id: envelope.id,
            receipt,
            body: envelope.body,
        }))
    }

    async fn delete_message(&self, message: &QueueMessage) -> Result<()> {
        let mut conn = self.redis.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .lrem(&self.processing_key, 1, &message.receipt)
            .zrem(&self.active_key, &message.id)
            .ignore();
        let (removed,): (i64,) = pipe.query_async(&mut conn).await.map_err(queue_error)?;

        if removed == 0 {
            debug!(queue = %self.name, id = %message.id, "Job was already reclaimed");
        }
        Ok(())
    }

    async fn attributes(&self) -> Result<BTreeMap<String, u64>> {
        let mut conn = self.redis.clone();
        let waiting: u64 = conn.llen(&self.name).await.map_err(queue_error)?;
        let active: u64 = conn.zcard(&self.active_key).await.map_err(queue_error)?;
        Ok(BTreeMap::from([
            ("waiting".to_string(), waiting),
            ("active".to_string(), active),
        ]))
    }
}
