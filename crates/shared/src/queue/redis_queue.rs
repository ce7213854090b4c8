use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{no_messages_error, Envelope, MessageQueue, WaitOption};
use crate::error::Error;

/// Wire shape stored in the Redis list: everything `Envelope` needs minus
/// the receipt handle, which is assigned fresh on every `peek` so a
/// requeued (visibility-timeout-expired) message gets an unrelated handle
/// than its first delivery — exactly as SQS behaves.
#[derive(Debug, Serialize, Deserialize)]
struct StoredMessage {
    id: String,
    kind: String,
    body: Value,
    trace_id: String,
}

/// Reproduces SQS's at-least-once / visibility-timeout contract on top of
/// Redis (no AWS SDK appears anywhere in the pack — see DESIGN.md). A list
/// (`{queue}:ready`) holds FIFO-ordered message bodies; a sorted set
/// (`{queue}:inflight`) tracks delivered-but-undeleted handles scored by
/// the unix timestamp their visibility lapses, so a periodic reaper can
/// push expired handles back onto `ready` without a dedicated broker.
pub struct RedisMessageQueue {
    conn: ConnectionManager,
    queue_name: String,
    visibility_timeout: Duration,
    poll_interval: Duration,
}

impl RedisMessageQueue {
    pub async fn connect(
        redis_url: &str,
        queue_name: impl Into<String>,
        visibility_timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Self, Error> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| Error::Queue(format!("invalid redis url: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::Queue(format!("couldn't connect to redis: {e}")))?;
        Ok(Self {
            conn,
            queue_name: queue_name.into(),
            visibility_timeout,
            poll_interval,
        })
    }

    fn ready_key(&self) -> String {
        format!("{}:ready", self.queue_name)
    }

    fn inflight_key(&self) -> String {
        format!("{}:inflight", self.queue_name)
    }

    fn handle_key(&self, handle: &str) -> String {
        format!("{}:handle:{}", self.queue_name, handle)
    }

    /// Moves any handle whose visibility timeout has lapsed back onto the
    /// ready list. Called opportunistically at the top of `peek` rather
    /// than on a separate timer, keeping the reaper's liveness tied to the
    /// same poll loop that consumes messages.
    async fn reap_expired(&self) -> Result<(), Error> {
        let mut conn = self.conn.clone();
        let now = now_unix();
        let expired: Vec<String> = conn
            .zrangebyscore(self.inflight_key(), 0, now)
            .await
            .map_err(|e| Error::Queue(format!("redis zrangebyscore failed: {e}")))?;

        for handle in expired {
            let raw: Option<String> = conn
                .get(self.handle_key(&handle))
                .await
                .map_err(|e| Error::Queue(format!("redis get failed: {e}")))?;
            let _: () = conn
                .zrem(self.inflight_key(), &handle)
                .await
                .map_err(|e| Error::Queue(format!("redis zrem failed: {e}")))?;
            if let Some(raw) = raw {
                let _: () = conn
                    .rpush(self.ready_key(), raw)
                    .await
                    .map_err(|e| Error::Queue(format!("redis rpush failed: {e}")))?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MessageQueue for RedisMessageQueue {
    async fn peek(&self, wait: WaitOption) -> Result<Envelope, Error> {
        self.reap_expired().await?;
        let mut conn = self.conn.clone();

        loop {
            let raw: Option<String> = conn
                .lpop(self.ready_key(), None)
                .await
                .map_err(|e| Error::Queue(format!("redis lpop failed: {e}")))?;

            if let Some(raw) = raw {
                let stored: StoredMessage =
                    serde_json::from_str(&raw).map_err(Error::from)?;
                let handle = Uuid::new_v4().to_string();
                let visible_until = now_unix() + self.visibility_timeout.as_secs() as i64;

                let _: () = conn
                    .set(self.handle_key(&handle), &raw)
                    .await
                    .map_err(|e| Error::Queue(format!("redis set failed: {e}")))?;
                let _: () = conn
                    .zadd(self.inflight_key(), &handle, visible_until)
                    .await
                    .map_err(|e| Error::Queue(format!("redis zadd failed: {e}")))?;

                return Ok(Envelope {
                    id: stored.id,
                    kind: stored.kind,
                    body: stored.body,
                    trace_id: stored.trace_id,
                    handle,
                });
            }

            match wait {
                WaitOption::NoWait => return Err(no_messages_error()),
                WaitOption::Wait => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }

    async fn delete(&self, handle: &str) -> Result<(), Error> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .zrem(self.inflight_key(), handle)
            .await
            .map_err(|e| Error::Queue(format!("redis zrem failed: {e}")))?;
        let _: () = conn
            .del(self.handle_key(handle))
            .await
            .map_err(|e| Error::Queue(format!("redis del failed: {e}")))?;
        Ok(())
    }

    async fn send(&self, kind: &str, trace_id: &str, body: Value) -> Result<(), Error> {
        let stored = StoredMessage {
            id: Uuid::new_v4().to_string(),
            kind: kind.to_string(),
            body,
            trace_id: trace_id.to_string(),
        };
        let raw = serde_json::to_string(&stored).map_err(Error::from)?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .rpush(self.ready_key(), raw)
            .await
            .map_err(|e| Error::Queue(format!("redis rpush failed: {e}")))?;
        Ok(())
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
