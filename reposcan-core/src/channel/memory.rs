use std::collections::VecDeque;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use super::{Delivery, MessageConsumer, MessagePublisher};
use crate::error::{Result, ScanError};

#[derive(Debug, Default)]
struct ChannelState {
    next_id: u64,
    pending: VecDeque<Delivery>,
    published: Vec<Vec<u8>>,
    acked: Vec<String>,
    fail_publishes: bool,
    closed: bool,
}

/// Single-topic channel held in process memory.
///
/// Acts as both publisher and consumer, and records everything that passes
/// through it so tests can assert on the traffic.
#[derive(Debug, Default)]
pub struct InMemoryChannel {
    state: Mutex<ChannelState>,
    notify: Notify,
}

impl InMemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `publish` fail with a channel error.
    pub async fn fail_publishes(&self, fail: bool) {
        self.state.lock().await.fail_publishes = fail;
    }

    /// Once the pending backlog drains, `next` fails as if the broker
    /// connection was lost.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.notify.notify_one();
    }

    pub async fn published(&self) -> Vec<Vec<u8>> {
        self.state.lock().await.published.clone()
    }

    pub async fn published_json<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.published()
            .await
            .iter()
            .map(|payload| serde_json::from_slice(payload).map_err(Into::into))
            .collect()
    }

    pub async fn acked(&self) -> Vec<String> {
        self.state.lock().await.acked.clone()
    }
}

#[async_trait]
impl MessagePublisher for InMemoryChannel {
    async fn publish(&self, payload: &[u8]) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.fail_publishes {
            return Err(ScanError::Channel("publish rejected".to_string()));
        }
        state.next_id += 1;
        let delivery = Delivery {
            id: format!("{}-0", state.next_id),
            payload: payload.to_vec(),
        };
        state.published.push(delivery.payload.clone());
        state.pending.push_back(delivery);
        drop(state);

        self.notify.notify_one();
        Ok(())
    }
}

#[async_trait]
impl MessageConsumer for InMemoryChannel {
    async fn next(&self, shutdown: &CancellationToken) -> Result<Option<Delivery>> {
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(delivery) = state.pending.pop_front() {
                    return Ok(Some(delivery));
                }
                if state.closed {
                    return Err(ScanError::Channel("channel closed".to_string()));
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => return Ok(None),
                _ = self.notify.notified() => {}
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.state.lock().await.acked.push(delivery.id.clone());
        Ok(())
    }
}
