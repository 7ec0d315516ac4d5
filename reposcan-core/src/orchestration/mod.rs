//! The scan pipeline.
//!
//! ```text
//! ScanService::trigger_scan ──request topic──▶ ScanDispatcher ──job queue──▶
//! ScanJobHandler ──result topic──▶ ScanService::handle_result_message
//! ```
//!
//! The trigger side owns the scan records. Workers never touch the store;
//! they only report progress on the result topic. [`StaleScanReaper`]
//! closes scans whose messages were lost along the way.

mod dispatcher;
mod reaper;
mod repository_service;
mod scan_service;
mod worker;

pub use dispatcher::ScanDispatcher;
pub use reaper::StaleScanReaper;
pub use repository_service::RepositoryService;
pub use scan_service::ScanService;
pub use worker::ScanJobHandler;

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use reposcan_model::{
        Finding, FindingMetadata, NewRepository, SCAN_SOURCE_CODE_JOB, ScanStatus,
    };
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::channel::{InMemoryChannel, run_consume_loop};
    use crate::error::Result;
    use crate::inspect::RepositoryInspector;
    use crate::queue::{InMemoryJobQueue, JobState, RetryConfig, WorkerPool, WorkerPoolConfig};
    use crate::store::{InMemoryStore, RepositoryStore};

    struct OneFinding;

    #[async_trait]
    impl RepositoryInspector for OneFinding {
        async fn scan(
            &self,
            _owner: &str,
            _repo: &str,
            _cancel: &CancellationToken,
        ) -> Result<Vec<Finding>> {
            Ok(vec![Finding::at_line(
                "sast",
                "G101",
                "config/keys.txt",
                1,
                FindingMetadata {
                    description: "Potential hardcoded credentials".into(),
                    severity: "HIGH".into(),
                },
            )])
        }
    }

    #[tokio::test]
    async fn scan_flows_from_trigger_to_success() {
        let store = Arc::new(InMemoryStore::new());
        let requests = Arc::new(InMemoryChannel::new());
        let results = Arc::new(InMemoryChannel::new());
        let queue = Arc::new(InMemoryJobQueue::new(RetryConfig::default()));

        let repository = RepositoryStore::create(
            store.as_ref(),
            &NewRepository::parse("https://github.com/acme/widgets").unwrap(),
        )
        .await
        .unwrap();
        let service = ScanService::new(store.clone(), store.clone(), requests.clone());

        // Trigger.
        let scan = service.trigger_scan(repository.id).await.unwrap();
        assert_eq!(scan.status, ScanStatus::Queued);

        // Dispatch.
        requests.close().await;
        let dispatcher = ScanDispatcher::new(queue.clone(), "scans");
        assert!(
            run_consume_loop(requests.as_ref(), &dispatcher, &CancellationToken::new())
                .await
                .is_err()
        );
        assert_eq!(queue.jobs().await.len(), 1);

        // Execute.
        let mut pool = WorkerPool::new(
            WorkerPoolConfig {
                queue: "scans".into(),
                concurrency: 1,
                poll_interval: Duration::from_millis(5),
                ..WorkerPoolConfig::default()
            },
            queue.clone(),
        );
        pool.register(
            SCAN_SOURCE_CODE_JOB,
            Arc::new(ScanJobHandler::new(Arc::new(OneFinding), results.clone())),
        );
        pool.start().await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while queue.jobs().await[0].state != JobState::Completed {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        pool.shutdown().await;

        // Report.
        results.close().await;
        let reaper = StaleScanReaper::new(
            store.clone(),
            Duration::from_secs(3600),
            chrono::Duration::minutes(30),
        );
        let _ = service
            .start(results.as_ref(), reaper, &CancellationToken::new())
            .await;

        let done = service.get_scan(scan.id).await.unwrap();
        assert_eq!(done.status, ScanStatus::Success);
        assert!(done.queued_at.is_some());
        assert!(done.scanning_at.is_some());
        assert!(done.finished_at.is_some());
        let findings = done.findings.unwrap();
        assert_eq!(findings.as_array().map(Vec::len), Some(1));
        assert_eq!(findings[0]["metadata"]["severity"], "HIGH");
    }
}
