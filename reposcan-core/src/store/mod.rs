//! Persistence ports for repositories and scans.
//!
//! The orchestration layer only talks to [`RepositoryStore`] and
//! [`ScanStore`]; [`PostgresStore`] is the production backend and
//! [`InMemoryStore`] backs unit tests.

mod memory;
mod migrate;
mod postgres;

pub use memory::InMemoryStore;
pub use migrate::Migrator;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reposcan_model::{
    NewRepository, NewScan, Page, Repository, RepositoryFilter, RepositoryId,
    RepositoryUpdate, Scan, ScanFilter, ScanId, ScanUpdate,
};

use crate::error::Result;

#[async_trait]
pub trait RepositoryStore: Send + Sync {
    /// Insert a repository. Registering a URL that already exists returns
    /// the existing record with a refreshed `updated_at`.
    async fn create(&self, record: &NewRepository) -> Result<Repository>;

    async fn get_by_id(&self, id: RepositoryId) -> Result<Repository>;

    async fn update(
        &self,
        id: RepositoryId,
        update: &RepositoryUpdate,
    ) -> Result<Repository>;

    async fn delete(&self, id: RepositoryId) -> Result<()>;

    /// Newest first.
    async fn list(
        &self,
        filter: &RepositoryFilter,
        page: Page,
    ) -> Result<Vec<Repository>>;
}

#[async_trait]
pub trait ScanStore: Send + Sync {
    async fn create(&self, record: &NewScan) -> Result<Scan>;

    async fn get_by_id(&self, id: ScanId) -> Result<Scan>;

    /// Sparse update: only the `Some` fields of `update` are written.
    ///
    /// When the update carries a status, it is applied only if the stored
    /// status may move to it; otherwise nothing is written and
    /// [`ScanError::InvalidTransition`](crate::ScanError::InvalidTransition)
    /// is returned.
    async fn update(&self, id: ScanId, update: &ScanUpdate) -> Result<Scan>;

    async fn delete(&self, id: ScanId) -> Result<()>;

    /// Newest first.
    async fn list(&self, filter: &ScanFilter, page: Page) -> Result<Vec<Scan>>;

    /// Force-fail every `Queued`/`In Progress` scan whose `queued_at` or
    /// `scanning_at` is older than `cutoff`. Returns the number of rows
    /// changed.
    async fn mark_stale_as_failure(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64>;
}
