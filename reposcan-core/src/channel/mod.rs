//! Message channel abstraction over a durable pub/sub log.
//!
//! Two logical topics connect the roles: scan requests (trigger to
//! dispatch) and scan results (worker to trigger). Each topic is read
//! through a consumer group so that several processes of one role share a
//! single cursor.
//!
//! [`run_consume_loop`] is the only consumption strategy. It reads one
//! message at a time, hands it to a [`MessageHandler`], and acknowledges it
//! whether or not the handler succeeded. A message whose handler fails is
//! therefore not redelivered; scans stranded that way are closed by the
//! stale-scan reaper. A failed read or acknowledgement is fatal and ends the
//! loop with an error.

mod memory;
mod redis_stream;

pub use self::memory::InMemoryChannel;
pub use self::redis_stream::{
    RedisStreamConsumer, RedisStreamPublisher, connect_redis,
};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Result;

/// One message read from a topic, pending acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Broker-assigned message id.
    pub id: String,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(&self, payload: &[u8]) -> Result<()>;
}

#[async_trait]
pub trait MessageConsumer: Send + Sync {
    /// Wait for the next message. Returns `Ok(None)` once `shutdown` fires.
    async fn next(&self, shutdown: &CancellationToken) -> Result<Option<Delivery>>;

    async fn ack(&self, delivery: &Delivery) -> Result<()>;
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, payload: &[u8]) -> Result<()>;
}

/// Serialize `message` as JSON and publish it.
pub async fn publish_json<T>(
    publisher: &dyn MessagePublisher,
    message: &T,
) -> Result<()>
where
    T: serde::Serialize + Sync,
{
    let payload = serde_json::to_vec(message)?;
    publisher.publish(&payload).await
}

/// Sequential, single-cursor consumption.
///
/// Returns `Ok(())` when `shutdown` is cancelled and `Err` when the channel
/// itself fails. Handler errors are logged and the message is acknowledged
/// anyway.
pub async fn run_consume_loop(
    consumer: &dyn MessageConsumer,
    handler: &dyn MessageHandler,
    shutdown: &CancellationToken,
) -> Result<()> {
    while let Some(delivery) = consumer.next(shutdown).await? {
        match handler.handle(&delivery.payload).await {
            Ok(()) => debug!(message_id = %delivery.id, "message handled"),
            Err(e) => warn!(
                message_id = %delivery.id,
                error = %e,
                "message handler failed; acknowledging without retry"
            ),
        }
        consumer.ack(&delivery).await?;
    }
    debug!("consume loop stopped by shutdown");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScanError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MessageHandler for Recording {
        async fn handle(&self, payload: &[u8]) -> Result<()> {
            let text = String::from_utf8_lossy(payload).to_string();
            self.seen.lock().unwrap().push(text.clone());
            if text == "bad" {
                return Err(ScanError::Validation("bad message".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_handler_still_advances_cursor() {
        let channel = InMemoryChannel::new();
        for msg in ["one", "bad", "three"] {
            channel.publish(msg.as_bytes()).await.unwrap();
        }
        channel.close().await;

        let handler = Recording::default();
        let err = run_consume_loop(&channel, &handler, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ScanError::Channel(_)));
        assert_eq!(*handler.seen.lock().unwrap(), vec!["one", "bad", "three"]);
        assert_eq!(channel.acked().await.len(), 3);
    }

    #[tokio::test]
    async fn cancellation_ends_loop_cleanly() {
        let channel = InMemoryChannel::new();
        let shutdown = CancellationToken::new();
        let handler = Recording::default();

        let stopper = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            stopper.cancel();
        });

        run_consume_loop(&channel, &handler, &shutdown).await.unwrap();
        assert!(handler.seen.lock().unwrap().is_empty());
    }
}
