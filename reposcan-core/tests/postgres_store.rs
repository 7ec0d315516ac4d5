#![cfg(feature = "postgres-tests")]

use anyhow::Result;
use chrono::{Duration, Utc};
use reposcan_core::ScanError;
use reposcan_core::queue::{
    DequeueRequest, EnqueueRequest, JobQueue, JobState, PostgresJobQueue, RetryConfig,
};
use reposcan_core::store::{PostgresStore, RepositoryStore, ScanStore};
use reposcan_model::{
    NewRepository, NewScan, Page, RepositoryFilter, ScanFilter, ScanStatus, ScanUpdate,
};
use serde_json::json;
use sqlx::PgPool;

async fn seeded_scan(store: &PostgresStore) -> Result<reposcan_model::Scan> {
    let repository = RepositoryStore::create(
        store,
        &NewRepository::parse("https://github.com/acme/widgets")?,
    )
    .await?;
    Ok(ScanStore::create(store, &NewScan::for_repository(&repository)).await?)
}

#[sqlx::test(migrations = "./migrations")]
async fn repository_url_is_upserted(pool: PgPool) -> Result<()> {
    let store = PostgresStore::from_pool(pool);
    let parsed = NewRepository::parse("https://github.com/acme/widgets")?;

    let first = RepositoryStore::create(&store, &parsed).await?;
    let second = RepositoryStore::create(&store, &parsed).await?;

    assert_eq!(first.id, second.id);
    assert!(second.updated_at >= first.updated_at);
    let all = RepositoryStore::list(&store, &RepositoryFilter::default(), Page::default())
        .await?;
    assert_eq!(all.len(), 1);
    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
async fn sparse_update_keeps_untouched_columns(pool: PgPool) -> Result<()> {
    let store = PostgresStore::from_pool(pool);
    let scan = seeded_scan(&store).await?;

    let findings = json!([{ "rule_id": "G101" }]);
    let queued_at = Utc::now();
    ScanStore::update(&store, scan.id, &ScanUpdate::queued(queued_at)).await?;
    ScanStore::update(
        &store,
        scan.id,
        &ScanUpdate::default().with_findings(Some(findings.clone())),
    )
    .await?;
    let updated =
        ScanStore::update(&store, scan.id, &ScanUpdate::status(ScanStatus::InProgress))
            .await?;

    assert_eq!(updated.status, ScanStatus::InProgress);
    assert_eq!(updated.findings, Some(findings));
    assert!(updated.queued_at.is_some());
    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
async fn terminal_scan_refuses_further_status(pool: PgPool) -> Result<()> {
    let store = PostgresStore::from_pool(pool);
    let scan = seeded_scan(&store).await?;

    ScanStore::update(
        &store,
        scan.id,
        &ScanUpdate::status(ScanStatus::Failure).with_finished_at(Some(Utc::now())),
    )
    .await?;
    let err = ScanStore::update(
        &store,
        scan.id,
        &ScanUpdate::status(ScanStatus::InProgress).with_scanning_at(Some(Utc::now())),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ScanError::InvalidTransition { .. }));
    let stored = ScanStore::get_by_id(&store, scan.id).await?;
    assert_eq!(stored.status, ScanStatus::Failure);
    assert!(stored.scanning_at.is_none());
    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
async fn stale_sweep_is_idempotent(pool: PgPool) -> Result<()> {
    let store = PostgresStore::from_pool(pool);
    let stale = seeded_scan(&store).await?;
    let fresh = seeded_scan(&store).await?;
    let now = Utc::now();

    let stale_at = now - Duration::minutes(31);
    let fresh_at = now - Duration::minutes(29);
    ScanStore::update(&store, stale.id, &ScanUpdate::queued(stale_at)).await?;
    ScanStore::update(&store, fresh.id, &ScanUpdate::queued(fresh_at)).await?;

    let cutoff = now - Duration::minutes(30);
    assert_eq!(store.mark_stale_as_failure(cutoff, now).await?, 1);
    assert_eq!(store.mark_stale_as_failure(cutoff, now).await?, 0);

    let stale = ScanStore::get_by_id(&store, stale.id).await?;
    let fresh = ScanStore::get_by_id(&store, fresh.id).await?;
    assert_eq!(stale.status, ScanStatus::Failure);
    assert_eq!(fresh.status, ScanStatus::Queued);

    let failed = ScanStore::list(
        &store,
        &ScanFilter {
            status: Some(ScanStatus::Failure),
            ..ScanFilter::default()
        },
        Page::default(),
    )
    .await?;
    assert_eq!(failed.len(), 1);
    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
async fn queue_leases_each_job_once(pool: PgPool) -> Result<()> {
    let queue = PostgresJobQueue::new(pool, RetryConfig::default());
    queue
        .enqueue(EnqueueRequest::json("scans", "scan_source_code", &json!({"n": 1}))?)
        .await?;

    let request = |worker: &str| DequeueRequest {
        queue: "scans".into(),
        job_types: vec!["scan_source_code".into()],
        worker_id: worker.into(),
        lease_ttl: Duration::seconds(30),
    };

    let (a, b) = tokio::join!(queue.dequeue(&request("a")), queue.dequeue(&request("b")));
    let leased: Vec<_> = [a?, b?].into_iter().flatten().collect();
    assert_eq!(leased.len(), 1);

    queue.complete(leased[0].lease_id).await?;
    assert!(queue.dequeue(&request("c")).await?.is_none());
    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
async fn retry_budget_ends_in_dead_letter(pool: PgPool) -> Result<()> {
    let queue = PostgresJobQueue::new(
        pool.clone(),
        RetryConfig {
            max_attempts: 2,
            backoff_base_ms: 0,
            backoff_max_ms: 0,
            jitter_ratio: 0.0,
        },
    );
    let handle = queue
        .enqueue(EnqueueRequest::json("scans", "scan_source_code", &json!({}))?)
        .await?;
    let request = DequeueRequest {
        queue: "scans".into(),
        job_types: vec!["scan_source_code".into()],
        worker_id: "w".into(),
        lease_ttl: Duration::seconds(30),
    };

    let lease = queue.dequeue(&request).await?.expect("first lease");
    queue.retry(lease.lease_id, "upstream 502").await?;
    let lease = queue.dequeue(&request).await?.expect("second lease");
    assert_eq!(lease.job.attempts, 1);
    queue.retry(lease.lease_id, "upstream 502").await?;

    assert!(queue.dequeue(&request).await?.is_none());
    let state: String = sqlx::query_scalar("SELECT state FROM scan_jobs WHERE id = $1")
        .bind(handle.id.0)
        .fetch_one(&pool)
        .await?;
    assert_eq!(state, JobState::DeadLetter.as_str());
    Ok(())
}
