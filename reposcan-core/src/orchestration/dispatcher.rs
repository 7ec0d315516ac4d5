use std::sync::Arc;

use async_trait::async_trait;
use reposcan_model::{SCAN_SOURCE_CODE_JOB, ScanJobPayload, ScanRequestMessage};
use tracing::info;

use crate::channel::MessageHandler;
use crate::error::Result;
use crate::queue::{EnqueueRequest, JobHandle, JobQueue};

/// Turns scan requests from the message channel into queued jobs.
#[derive(Clone)]
pub struct ScanDispatcher {
    queue: Arc<dyn JobQueue>,
    queue_name: String,
}

impl std::fmt::Debug for ScanDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanDispatcher")
            .field("queue_name", &self.queue_name)
            .finish_non_exhaustive()
    }
}

impl ScanDispatcher {
    pub fn new(queue: Arc<dyn JobQueue>, queue_name: impl Into<String>) -> Self {
        Self {
            queue,
            queue_name: queue_name.into(),
        }
    }

    pub async fn dispatch(&self, request: &ScanRequestMessage) -> Result<JobHandle> {
        let payload = ScanJobPayload {
            scan_id: request.scan_id,
            owner_name: request.owner.clone(),
            repo_name: request.repository.clone(),
        };
        let job = EnqueueRequest::json(&self.queue_name, SCAN_SOURCE_CODE_JOB, &payload)?;
        let handle = self.queue.enqueue(job).await?;

        info!(
            scan_id = %request.scan_id,
            job_id = %handle.id,
            queue = %handle.queue,
            "scan job enqueued"
        );
        Ok(handle)
    }
}

#[async_trait]
impl MessageHandler for ScanDispatcher {
    async fn handle(&self, payload: &[u8]) -> Result<()> {
        let request: ScanRequestMessage = serde_json::from_slice(payload)?;
        self.dispatch(&request).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScanError;
    use crate::queue::{InMemoryJobQueue, JobState, RetryConfig};
    use reposcan_model::ScanId;
    use serde_json::json;

    #[tokio::test]
    async fn request_becomes_scan_job() {
        let queue = Arc::new(InMemoryJobQueue::new(RetryConfig::default()));
        let dispatcher = ScanDispatcher::new(queue.clone(), "scans");

        let payload = serde_json::to_vec(&json!({
            "scan_id": 7,
            "owner": "acme",
            "repository": "widgets"
        }))
        .unwrap();
        dispatcher.handle(&payload).await.unwrap();

        let jobs = queue.jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].queue, "scans");
        assert_eq!(jobs[0].job_type, SCAN_SOURCE_CODE_JOB);
        assert_eq!(jobs[0].state, JobState::Ready);
        assert_eq!(
            jobs[0].payload,
            json!({"scan_id": 7, "owner_name": "acme", "repo_name": "widgets"})
        );

        let decoded: ScanJobPayload = serde_json::from_value(jobs[0].payload.clone()).unwrap();
        assert_eq!(decoded.scan_id, ScanId(7));
    }

    #[tokio::test]
    async fn malformed_request_enqueues_nothing() {
        let queue = Arc::new(InMemoryJobQueue::new(RetryConfig::default()));
        let dispatcher = ScanDispatcher::new(queue.clone(), "scans");

        let err = dispatcher.handle(b"{\"scan_id\":").await.unwrap_err();
        assert!(matches!(err, ScanError::Serialization(_)));
        assert!(queue.jobs().await.is_empty());
    }
}
