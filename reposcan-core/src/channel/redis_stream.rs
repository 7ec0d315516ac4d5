use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamId, StreamReadReply};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Delivery, MessageConsumer, MessagePublisher};
use crate::error::{Result, ScanError};

const PAYLOAD_FIELD: &str = "payload";

/// Open a managed, auto-reconnecting connection to Redis.
pub async fn connect_redis(redis_url: &str) -> Result<ConnectionManager> {
    info!("Connecting to Redis at {}", redis_url);

    let client = redis::Client::open(redis_url).map_err(|e| {
        ScanError::Channel(format!("Failed to create Redis client: {e}"))
    })?;
    let conn = ConnectionManager::new(client).await.map_err(|e| {
        ScanError::Channel(format!("Failed to connect to Redis: {e}"))
    })?;

    info!("Successfully connected to Redis");
    Ok(conn)
}

/// Appends messages to a Redis stream.
#[derive(Clone)]
pub struct RedisStreamPublisher {
    conn: ConnectionManager,
    stream: String,
    max_len: Option<usize>,
}

impl fmt::Debug for RedisStreamPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStreamPublisher")
            .field("stream", &self.stream)
            .field("max_len", &self.max_len)
            .finish()
    }
}

impl RedisStreamPublisher {
    /// `max_len` caps the stream approximately (`MAXLEN ~`).
    pub fn new(
        conn: ConnectionManager,
        stream: impl Into<String>,
        max_len: Option<usize>,
    ) -> Self {
        Self {
            conn,
            stream: stream.into(),
            max_len,
        }
    }
}

#[async_trait]
impl MessagePublisher for RedisStreamPublisher {
    async fn publish(&self, payload: &[u8]) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("XADD");
        cmd.arg(&self.stream);
        if let Some(max_len) = self.max_len {
            cmd.arg("MAXLEN").arg("~").arg(max_len);
        }
        cmd.arg("*").arg(PAYLOAD_FIELD).arg(payload);

        let id: String = cmd.query_async(&mut conn).await.map_err(|e| {
            ScanError::Channel(format!("XADD to {} failed: {e}", self.stream))
        })?;

        debug!(stream = %self.stream, message_id = %id, "message published");
        Ok(())
    }
}

/// Reads a Redis stream as one member of a consumer group.
#[derive(Clone)]
pub struct RedisStreamConsumer {
    conn: ConnectionManager,
    stream: String,
    group: String,
    consumer: String,
    poll_interval: Duration,
}

impl fmt::Debug for RedisStreamConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStreamConsumer")
            .field("stream", &self.stream)
            .field("group", &self.group)
            .field("consumer", &self.consumer)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl RedisStreamConsumer {
    /// Join `group` on `stream`, creating both if they do not exist yet.
    pub async fn subscribe(
        conn: ConnectionManager,
        stream: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
        poll_interval: Duration,
    ) -> Result<Self> {
        let this = Self {
            conn,
            stream: stream.into(),
            group: group.into(),
            consumer: consumer.into(),
            poll_interval,
        };
        this.ensure_group().await?;
        Ok(this)
    }

    async fn ensure_group(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let created: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match created {
            Ok(()) => {
                info!(stream = %self.stream, group = %self.group, "consumer group created");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => {
                debug!(stream = %self.stream, group = %self.group, "consumer group exists");
                Ok(())
            }
            Err(e) => Err(ScanError::Channel(format!(
                "XGROUP CREATE {} {} failed: {e}",
                self.stream, self.group
            ))),
        }
    }

    async fn read_one(&self) -> Result<Option<Delivery>> {
        let mut conn = self.conn.clone();
        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(1)
            .arg("STREAMS")
            .arg(&self.stream)
            .arg(">")
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                ScanError::Channel(format!("XREADGROUP on {} failed: {e}", self.stream))
            })?;

        Ok(reply
            .into_iter()
            .flat_map(|reply| reply.keys)
            .flat_map(|key| key.ids)
            .next()
            .map(|entry| self.to_delivery(entry)))
    }

    fn to_delivery(&self, entry: StreamId) -> Delivery {
        let payload = entry.get::<Vec<u8>>(PAYLOAD_FIELD).unwrap_or_else(|| {
            warn!(
                stream = %self.stream,
                message_id = %entry.id,
                "stream entry has no payload field"
            );
            Vec::new()
        });
        Delivery {
            id: entry.id,
            payload,
        }
    }
}

#[async_trait]
impl MessageConsumer for RedisStreamConsumer {
    async fn next(&self, shutdown: &CancellationToken) -> Result<Option<Delivery>> {
        loop {
            let read = tokio::select! {
                _ = shutdown.cancelled() => return Ok(None),
                read = self.read_one() => read?,
            };
            if let Some(delivery) = read {
                return Ok(Some(delivery));
            }

            tokio::select! {
                _ = shutdown.cancelled() => return Ok(None),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let mut conn = self.conn.clone();
        let _acked: i64 = redis::cmd("XACK")
            .arg(&self.stream)
            .arg(&self.group)
            .arg(&delivery.id)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                ScanError::Channel(format!(
                    "XACK {} on {} failed: {e}",
                    delivery.id, self.stream
                ))
            })?;
        Ok(())
    }
}
