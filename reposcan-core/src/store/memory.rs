use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reposcan_model::{
    NewRepository, NewScan, Page, Repository, RepositoryFilter, RepositoryId,
    RepositoryUpdate, Scan, ScanFilter, ScanId, ScanStatus, ScanUpdate,
};
use tokio::sync::Mutex;

use super::{RepositoryStore, ScanStore};
use crate::error::{Result, ScanError};

#[derive(Debug, Default)]
struct Tables {
    next_repository_id: i64,
    next_scan_id: i64,
    repositories: BTreeMap<RepositoryId, Repository>,
    scans: BTreeMap<ScanId, Scan>,
}

/// Process-local store with the same semantics as [`PostgresStore`](super::PostgresStore).
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a scan record as-is, bypassing the transition guard.
    pub async fn insert_scan(&self, mut scan: Scan) -> Scan {
        let mut tables = self.tables.lock().await;
        if scan.id.get() <= 0 {
            tables.next_scan_id += 1;
            scan.id = ScanId(tables.next_scan_id);
        } else {
            tables.next_scan_id = tables.next_scan_id.max(scan.id.get());
        }
        tables.scans.insert(scan.id, scan.clone());
        scan
    }

    pub async fn scans(&self) -> Vec<Scan> {
        self.tables.lock().await.scans.values().cloned().collect()
    }
}

fn paginate<T>(items: impl DoubleEndedIterator<Item = T>, page: Page) -> Vec<T> {
    items
        .rev()
        .skip(page.offset() as usize)
        .take(page.limit() as usize)
        .collect()
}

#[async_trait]
impl RepositoryStore for InMemoryStore {
    async fn create(&self, record: &NewRepository) -> Result<Repository> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();

        if let Some(existing) = tables
            .repositories
            .values_mut()
            .find(|r| r.repository_url == record.repository_url)
        {
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        tables.next_repository_id += 1;
        let repository = Repository {
            id: RepositoryId(tables.next_repository_id),
            name: record.name.clone(),
            owner: record.owner.clone(),
            repository_url: record.repository_url.clone(),
            created_at: now,
            updated_at: now,
        };
        tables.repositories.insert(repository.id, repository.clone());
        Ok(repository)
    }

    async fn get_by_id(&self, id: RepositoryId) -> Result<Repository> {
        self.tables
            .lock()
            .await
            .repositories
            .get(&id)
            .cloned()
            .ok_or_else(|| ScanError::NotFound(format!("repository {id}")))
    }

    async fn update(
        &self,
        id: RepositoryId,
        update: &RepositoryUpdate,
    ) -> Result<Repository> {
        let mut tables = self.tables.lock().await;

        if let Some(url) = &update.repository_url
            && tables
                .repositories
                .values()
                .any(|r| r.id != id && &r.repository_url == url)
        {
            return Err(ScanError::Validation(
                "repository url is already registered".to_string(),
            ));
        }

        let repository = tables
            .repositories
            .get_mut(&id)
            .ok_or_else(|| ScanError::NotFound(format!("repository {id}")))?;
        if !update.is_empty() {
            update.apply_to(repository);
            repository.updated_at = Utc::now();
        }
        Ok(repository.clone())
    }

    async fn delete(&self, id: RepositoryId) -> Result<()> {
        self.tables
            .lock()
            .await
            .repositories
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| ScanError::NotFound(format!("repository {id}")))
    }

    async fn list(
        &self,
        filter: &RepositoryFilter,
        page: Page,
    ) -> Result<Vec<Repository>> {
        let tables = self.tables.lock().await;
        let matching = tables
            .repositories
            .values()
            .filter(|r| filter.owner.as_deref().is_none_or(|o| o == r.owner))
            .cloned()
            .collect::<Vec<_>>();
        Ok(paginate(matching.into_iter(), page))
    }
}

#[async_trait]
impl ScanStore for InMemoryStore {
    async fn create(&self, record: &NewScan) -> Result<Scan> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        tables.next_scan_id += 1;
        let scan = Scan {
            id: ScanId(tables.next_scan_id),
            repository_id: record.repository_id,
            repository_name: record.repository_name.clone(),
            repository_url: record.repository_url.clone(),
            findings: None,
            status: record.status,
            queued_at: None,
            scanning_at: None,
            finished_at: None,
            created_at: now,
            updated_at: now,
        };
        tables.scans.insert(scan.id, scan.clone());
        Ok(scan)
    }

    async fn get_by_id(&self, id: ScanId) -> Result<Scan> {
        self.tables
            .lock()
            .await
            .scans
            .get(&id)
            .cloned()
            .ok_or_else(|| ScanError::NotFound(format!("scan {id}")))
    }

    async fn update(&self, id: ScanId, update: &ScanUpdate) -> Result<Scan> {
        let mut tables = self.tables.lock().await;
        let scan = tables
            .scans
            .get_mut(&id)
            .ok_or_else(|| ScanError::NotFound(format!("scan {id}")))?;

        if update.is_empty() {
            return Ok(scan.clone());
        }
        if let Some(next) = update.status
            && !scan.status.can_transition_to(next)
        {
            return Err(ScanError::InvalidTransition {
                scan_id: id,
                from: scan.status,
                to: next,
            });
        }

        update.apply_to(scan);
        scan.updated_at = Utc::now();
        Ok(scan.clone())
    }

    async fn delete(&self, id: ScanId) -> Result<()> {
        self.tables
            .lock()
            .await
            .scans
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| ScanError::NotFound(format!("scan {id}")))
    }

    async fn list(&self, filter: &ScanFilter, page: Page) -> Result<Vec<Scan>> {
        let tables = self.tables.lock().await;
        let matching = tables
            .scans
            .values()
            .filter(|s| {
                filter.matches(s.repository_id, &s.repository_name, s.status)
            })
            .cloned()
            .collect::<Vec<_>>();
        Ok(paginate(matching.into_iter(), page))
    }

    async fn mark_stale_as_failure(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let mut changed = 0;
        for scan in tables.scans.values_mut() {
            let open = matches!(
                scan.status,
                ScanStatus::Queued | ScanStatus::InProgress
            );
            let stale = scan.queued_at.is_some_and(|at| at < cutoff)
                || scan.scanning_at.is_some_and(|at| at < cutoff);
            if open && stale {
                scan.status = ScanStatus::Failure;
                scan.finished_at = Some(now);
                scan.updated_at = now;
                changed += 1;
            }
        }
        Ok(changed)
    }
}
