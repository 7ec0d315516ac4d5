use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use reposcan_model::{
    NewRepository, NewScan, Page, Repository, RepositoryFilter, RepositoryId,
    RepositoryUpdate, Scan, ScanFilter, ScanId, ScanStatus, ScanUpdate,
};
use sqlx::{
    PgConnection, PgPool, Postgres, QueryBuilder, postgres::PgPoolOptions,
};
use std::{fmt, time::Duration};
use tracing::{debug, info};

use super::{RepositoryStore, ScanStore};
use crate::error::{Result, ScanError};

const REPOSITORY_COLUMNS: &str =
    "id, name, owner, repository_url, created_at, updated_at";

const SCAN_COLUMNS: &str = "id, repository_id, repository_name, repository_url, findings, \
     status, queued_at, scanning_at, finished_at, created_at, updated_at";

/// Scan and repository persistence on PostgreSQL.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresStore")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .finish()
    }
}

impl PostgresStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(url)
            .await
            .map_err(|e| {
                ScanError::Database(format!("Database connection failed: {e}"))
            })?;

        info!(max_connections, "database pool initialized");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run `f` inside a transaction.
    ///
    /// The transaction commits only when `f` returns `Ok`. An `Err`, or the
    /// future being dropped mid-flight, drops the handle and rolls back.
    pub async fn with_transaction<T, F>(&self, f: F) -> Result<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T>>
            + Send,
    {
        let mut tx = self.pool.begin().await?;
        let value = f(&mut *tx).await?;
        tx.commit().await?;
        Ok(value)
    }
}

#[derive(sqlx::FromRow)]
struct ScanRow {
    id: i64,
    repository_id: i64,
    repository_name: String,
    repository_url: String,
    findings: Option<serde_json::Value>,
    status: String,
    queued_at: Option<DateTime<Utc>>,
    scanning_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ScanRow> for Scan {
    type Error = ScanError;

    fn try_from(row: ScanRow) -> Result<Self> {
        let status = parse_status(row.id, &row.status)?;
        Ok(Scan {
            id: ScanId(row.id),
            repository_id: RepositoryId(row.repository_id),
            repository_name: row.repository_name,
            repository_url: row.repository_url,
            findings: row.findings,
            status,
            queued_at: row.queued_at,
            scanning_at: row.scanning_at,
            finished_at: row.finished_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn parse_status(scan_id: i64, raw: &str) -> Result<ScanStatus> {
    raw.parse().map_err(|e| {
        ScanError::Database(format!("scan {scan_id} has corrupt status: {e}"))
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == "23505")
}

#[async_trait]
impl RepositoryStore for PostgresStore {
    async fn create(&self, record: &NewRepository) -> Result<Repository> {
        let sql = format!(
            "INSERT INTO repositories (name, owner, repository_url) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (repository_url) DO UPDATE SET updated_at = NOW() \
             RETURNING {REPOSITORY_COLUMNS}"
        );
        let repository = sqlx::query_as::<_, Repository>(&sql)
            .bind(&record.name)
            .bind(&record.owner)
            .bind(&record.repository_url)
            .fetch_one(&self.pool)
            .await?;

        debug!(repository_id = %repository.id, "repository stored");
        Ok(repository)
    }

    async fn get_by_id(&self, id: RepositoryId) -> Result<Repository> {
        let sql =
            format!("SELECT {REPOSITORY_COLUMNS} FROM repositories WHERE id = $1");
        sqlx::query_as::<_, Repository>(&sql)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ScanError::NotFound(format!("repository {id}")))
    }

    async fn update(
        &self,
        id: RepositoryId,
        update: &RepositoryUpdate,
    ) -> Result<Repository> {
        if update.is_empty() {
            return RepositoryStore::get_by_id(self, id).await;
        }

        let mut qb = QueryBuilder::<Postgres>::new(
            "UPDATE repositories SET updated_at = NOW()",
        );
        if let Some(owner) = &update.owner {
            qb.push(", owner = ").push_bind(owner);
        }
        if let Some(name) = &update.name {
            qb.push(", name = ").push_bind(name);
        }
        if let Some(url) = &update.repository_url {
            qb.push(", repository_url = ").push_bind(url);
        }
        qb.push(" WHERE id = ").push_bind(id.get());
        qb.push(" RETURNING ").push(REPOSITORY_COLUMNS);

        qb.build_query_as::<Repository>()
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    ScanError::Validation(
                        "repository url is already registered".to_string(),
                    )
                } else {
                    e.into()
                }
            })?
            .ok_or_else(|| ScanError::NotFound(format!("repository {id}")))
    }

    async fn delete(&self, id: RepositoryId) -> Result<()> {
        let res = sqlx::query("DELETE FROM repositories WHERE id = $1")
            .bind(id.get())
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(ScanError::NotFound(format!("repository {id}")));
        }
        Ok(())
    }

    async fn list(
        &self,
        filter: &RepositoryFilter,
        page: Page,
    ) -> Result<Vec<Repository>> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT ");
        qb.push(REPOSITORY_COLUMNS).push(" FROM repositories WHERE TRUE");
        if let Some(owner) = &filter.owner {
            qb.push(" AND owner = ").push_bind(owner);
        }
        qb.push(" ORDER BY id DESC LIMIT ")
            .push_bind(page.limit() as i64)
            .push(" OFFSET ")
            .push_bind(page.offset() as i64);

        Ok(qb
            .build_query_as::<Repository>()
            .fetch_all(&self.pool)
            .await?)
    }
}

#[async_trait]
impl ScanStore for PostgresStore {
    async fn create(&self, record: &NewScan) -> Result<Scan> {
        let sql = format!(
            "INSERT INTO scans (repository_id, repository_name, repository_url, status) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {SCAN_COLUMNS}"
        );
        let row = sqlx::query_as::<_, ScanRow>(&sql)
            .bind(record.repository_id.get())
            .bind(&record.repository_name)
            .bind(&record.repository_url)
            .bind(record.status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Scan::try_from(row)
    }

    async fn get_by_id(&self, id: ScanId) -> Result<Scan> {
        let sql = format!("SELECT {SCAN_COLUMNS} FROM scans WHERE id = $1");
        let row = sqlx::query_as::<_, ScanRow>(&sql)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ScanError::NotFound(format!("scan {id}")))?;
        Scan::try_from(row)
    }

    async fn update(&self, id: ScanId, update: &ScanUpdate) -> Result<Scan> {
        if update.is_empty() {
            return ScanStore::get_by_id(self, id).await;
        }

        let update = update.clone();
        self.with_transaction(move |conn| {
            Box::pin(async move {
                let current: Option<String> = sqlx::query_scalar(
                    "SELECT status FROM scans WHERE id = $1 FOR UPDATE",
                )
                .bind(id.get())
                .fetch_optional(&mut *conn)
                .await?;

                let Some(current) = current else {
                    return Err(ScanError::NotFound(format!("scan {id}")));
                };
                let current = parse_status(id.get(), &current)?;

                if let Some(next) = update.status
                    && !current.can_transition_to(next)
                {
                    return Err(ScanError::InvalidTransition {
                        scan_id: id,
                        from: current,
                        to: next,
                    });
                }

                let mut qb = QueryBuilder::<Postgres>::new(
                    "UPDATE scans SET updated_at = NOW()",
                );
                if let Some(status) = update.status {
                    qb.push(", status = ").push_bind(status.as_str());
                }
                if let Some(findings) = update.findings {
                    qb.push(", findings = ").push_bind(findings);
                }
                if let Some(at) = update.queued_at {
                    qb.push(", queued_at = ").push_bind(at);
                }
                if let Some(at) = update.scanning_at {
                    qb.push(", scanning_at = ").push_bind(at);
                }
                if let Some(at) = update.finished_at {
                    qb.push(", finished_at = ").push_bind(at);
                }
                qb.push(" WHERE id = ").push_bind(id.get());
                qb.push(" RETURNING ").push(SCAN_COLUMNS);

                let row = qb
                    .build_query_as::<ScanRow>()
                    .fetch_one(&mut *conn)
                    .await?;
                Scan::try_from(row)
            })
        })
        .await
    }

    async fn delete(&self, id: ScanId) -> Result<()> {
        let res = sqlx::query("DELETE FROM scans WHERE id = $1")
            .bind(id.get())
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(ScanError::NotFound(format!("scan {id}")));
        }
        Ok(())
    }

    async fn list(&self, filter: &ScanFilter, page: Page) -> Result<Vec<Scan>> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT ");
        qb.push(SCAN_COLUMNS).push(" FROM scans WHERE TRUE");
        if let Some(repository_id) = filter.repository_id {
            qb.push(" AND repository_id = ")
                .push_bind(repository_id.get());
        }
        if let Some(name) = &filter.repository_name {
            qb.push(" AND repository_name = ").push_bind(name);
        }
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        qb.push(" ORDER BY id DESC LIMIT ")
            .push_bind(page.limit() as i64)
            .push(" OFFSET ")
            .push_bind(page.offset() as i64);

        qb.build_query_as::<ScanRow>()
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Scan::try_from)
            .collect()
    }

    async fn mark_stale_as_failure(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let res = sqlx::query(
            r#"
            UPDATE scans
            SET status = $1,
                finished_at = $2,
                updated_at = NOW()
            WHERE status IN ($3, $4)
              AND (queued_at < $5 OR scanning_at < $5)
            "#,
        )
        .bind(ScanStatus::Failure.as_str())
        .bind(now)
        .bind(ScanStatus::Queued.as_str())
        .bind(ScanStatus::InProgress.as_str())
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected())
    }
}
