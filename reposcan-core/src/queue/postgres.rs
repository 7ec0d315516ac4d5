use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    DequeueRequest, EnqueueRequest, JobHandle, JobId, JobLease, JobQueue,
    JobRecord, JobState, LeaseId, RetryConfig,
};
use crate::error::{Result, ScanError};

/// Job queue persisted in the `scan_jobs` table.
///
/// Dequeue uses `FOR UPDATE SKIP LOCKED` so any number of workers across
/// processes can poll the same queue without handing one job to two of
/// them.
#[derive(Clone)]
pub struct PostgresJobQueue {
    pool: PgPool,
    retry_config: RetryConfig,
}

impl fmt::Debug for PostgresJobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresJobQueue")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .field("retry_config", &self.retry_config)
            .finish()
    }
}

#[derive(sqlx::FromRow)]
struct SelectedRow {
    id: Uuid,
    queue: String,
    job_type: String,
    payload: serde_json::Value,
    attempts: i32,
    available_at: DateTime<Utc>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
}

impl PostgresJobQueue {
    pub fn new(pool: PgPool, retry_config: RetryConfig) -> Self {
        Self { pool, retry_config }
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry_config
    }
}

fn queue_err(context: &str) -> impl FnOnce(sqlx::Error) -> ScanError + '_ {
    move |e| ScanError::Queue(format!("{context} failed: {e}"))
}

#[async_trait]
impl JobQueue for PostgresJobQueue {
    async fn enqueue(&self, request: EnqueueRequest) -> Result<JobHandle> {
        let id = JobId::new();
        sqlx::query(
            r#"
            INSERT INTO scan_jobs (id, queue, job_type, payload, state, attempts, available_at)
            VALUES ($1, $2, $3, $4, 'ready', 0, NOW())
            "#,
        )
        .bind(id.0)
        .bind(&request.queue)
        .bind(&request.job_type)
        .bind(&request.payload)
        .execute(&self.pool)
        .await
        .map_err(queue_err("enqueue insert"))?;

        debug!(job_id = %id, queue = %request.queue, job_type = %request.job_type, "job enqueued");
        Ok(JobHandle {
            id,
            queue: request.queue,
        })
    }

    async fn dequeue(&self, request: &DequeueRequest) -> Result<Option<JobLease>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(queue_err("begin dequeue tx"))?;

        let row: Option<SelectedRow> = sqlx::query_as(
            r#"
            SELECT id, queue, job_type, payload, attempts, available_at,
                   last_error, created_at
            FROM scan_jobs
            WHERE queue = $1
              AND job_type = ANY($2)
              AND state = 'ready'
              AND available_at <= NOW()
            ORDER BY available_at ASC, attempts ASC, created_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(&request.queue)
        .bind(&request.job_types)
        .fetch_optional(&mut *tx)
        .await
        .map_err(queue_err("dequeue select"))?;

        let Some(row) = row else {
            // Nothing ready
            drop(tx);
            return Ok(None);
        };

        let lease_id = LeaseId::new();
        let expires_at = Utc::now() + request.lease_ttl;

        sqlx::query(
            r#"
            UPDATE scan_jobs
            SET state = 'leased',
                lease_owner = $1,
                lease_id = $2,
                lease_expires_at = $3,
                updated_at = NOW()
            WHERE id = $4
            "#,
        )
        .bind(&request.worker_id)
        .bind(lease_id.0)
        .bind(expires_at)
        .bind(row.id)
        .execute(&mut *tx)
        .await
        .map_err(queue_err("dequeue update->leased"))?;

        tx.commit().await.map_err(queue_err("dequeue tx commit"))?;

        let job = JobRecord {
            id: JobId(row.id),
            queue: row.queue,
            job_type: row.job_type,
            payload: row.payload,
            state: JobState::Leased,
            attempts: row.attempts.max(0) as u16,
            available_at: row.available_at,
            last_error: row.last_error,
            created_at: row.created_at,
        };

        Ok(Some(JobLease {
            lease_id,
            job,
            lease_owner: request.worker_id.clone(),
            expires_at,
        }))
    }

    async fn renew(
        &self,
        lease_id: LeaseId,
        extend_by: chrono::Duration,
    ) -> Result<DateTime<Utc>> {
        let expires_at = Utc::now() + extend_by;
        let res = sqlx::query(
            r#"
            UPDATE scan_jobs
            SET lease_expires_at = $2,
                updated_at = NOW()
            WHERE lease_id = $1 AND state = 'leased'
            "#,
        )
        .bind(lease_id.0)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(queue_err("renew update"))?;

        if res.rows_affected() == 0 {
            return Err(ScanError::NotFound(format!("lease {lease_id}")));
        }
        debug!(lease_id = %lease_id, %expires_at, "lease renewed");
        Ok(expires_at)
    }

    async fn complete(&self, lease_id: LeaseId) -> Result<()> {
        let res = sqlx::query(
            r#"
            UPDATE scan_jobs
            SET state = 'completed',
                lease_owner = NULL,
                lease_id = NULL,
                lease_expires_at = NULL,
                updated_at = NOW()
            WHERE lease_id = $1 AND state = 'leased'
            "#,
        )
        .bind(lease_id.0)
        .execute(&self.pool)
        .await
        .map_err(queue_err("complete update"))?;

        if res.rows_affected() > 0 {
            debug!(lease_id = %lease_id, "job completed");
        }
        Ok(())
    }

    async fn retry(&self, lease_id: LeaseId, error: &str) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(queue_err("begin retry tx"))?;

        let row: Option<(Uuid, i32)> = sqlx::query_as(
            r#"
            SELECT id, attempts
            FROM scan_jobs
            WHERE lease_id = $1 AND state = 'leased'
            FOR UPDATE
            "#,
        )
        .bind(lease_id.0)
        .fetch_optional(&mut *tx)
        .await
        .map_err(queue_err("retry select"))?;

        let Some((id, attempts_before)) = row else {
            drop(tx);
            return Ok(());
        };

        let max_attempts = i32::from(self.retry_config.max_attempts);
        if attempts_before + 1 < max_attempts {
            let attempt_next = attempts_before.saturating_add(1) as u16;
            let delay_ms = self.retry_config.delay_ms(JobId(id), attempt_next);

            sqlx::query(
                r#"
                UPDATE scan_jobs
                SET attempts = attempts + 1,
                    state = 'ready',
                    lease_owner = NULL,
                    lease_id = NULL,
                    lease_expires_at = NULL,
                    last_error = $2,
                    available_at = NOW() + ($3::bigint) * INTERVAL '1 millisecond',
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(error)
            .bind(delay_ms as i64)
            .execute(&mut *tx)
            .await
            .map_err(queue_err("retry update"))?;

            tx.commit().await.map_err(queue_err("retry tx commit"))?;

            warn!(
                job_id = %id,
                attempts = attempts_before + 1,
                delay_ms,
                "job failed; retry scheduled"
            );
        } else {
            sqlx::query(
                r#"
                UPDATE scan_jobs
                SET attempts = attempts + 1,
                    state = 'dead_letter',
                    lease_owner = NULL,
                    lease_id = NULL,
                    lease_expires_at = NULL,
                    last_error = $2,
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(error)
            .execute(&mut *tx)
            .await
            .map_err(queue_err("retry terminal update"))?;

            tx.commit().await.map_err(queue_err("retry tx commit"))?;

            warn!(
                job_id = %id,
                attempts = attempts_before + 1,
                "job moved to dead_letter after exhausting retries"
            );
        }
        Ok(())
    }

    async fn dead_letter(&self, lease_id: LeaseId, error: &str) -> Result<()> {
        let res = sqlx::query(
            r#"
            UPDATE scan_jobs
            SET state = 'dead_letter',
                lease_owner = NULL,
                lease_id = NULL,
                lease_expires_at = NULL,
                last_error = $2,
                updated_at = NOW()
            WHERE lease_id = $1
            "#,
        )
        .bind(lease_id.0)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(queue_err("dead_letter update"))?;

        if res.rows_affected() > 0 {
            warn!(lease_id = %lease_id, error, "job moved to dead_letter");
        }
        Ok(())
    }

    async fn reclaim_expired(&self) -> Result<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(queue_err("begin reclaim tx"))?;

        let expired: Vec<(Uuid, i32)> = sqlx::query_as(
            r#"
            SELECT id, attempts
            FROM scan_jobs
            WHERE state = 'leased'
              AND lease_expires_at IS NOT NULL
              AND lease_expires_at < NOW()
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(queue_err("lease expiry scan"))?;

        let max_attempts = i32::from(self.retry_config.max_attempts);
        let mut resurrected = 0u64;

        for (id, attempts_before) in expired {
            if attempts_before + 1 < max_attempts {
                let attempt_next = attempts_before.saturating_add(1) as u16;
                let delay_ms = self.retry_config.delay_ms(JobId(id), attempt_next);
                sqlx::query(
                    r#"
                    UPDATE scan_jobs
                    SET attempts = attempts + 1,
                        state = 'ready',
                        lease_owner = NULL,
                        lease_id = NULL,
                        lease_expires_at = NULL,
                        available_at = NOW() + ($2::bigint) * INTERVAL '1 millisecond',
                        last_error = COALESCE(last_error, 'lease expired'),
                        updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(delay_ms as i64)
                .execute(&mut *tx)
                .await
                .map_err(queue_err("lease resurrection"))?;
                resurrected += 1;
            } else {
                sqlx::query(
                    r#"
                    UPDATE scan_jobs
                    SET attempts = attempts + 1,
                        state = 'dead_letter',
                        lease_owner = NULL,
                        lease_id = NULL,
                        lease_expires_at = NULL,
                        last_error = COALESCE(last_error, 'lease expired (max attempts)'),
                        updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(queue_err("lease dead_letter"))?;
            }
        }

        tx.commit().await.map_err(queue_err("reclaim tx commit"))?;

        if resurrected > 0 {
            info!(resurrected, "reclaimed expired job leases");
        }
        Ok(resurrected)
    }
}
