use std::sync::Arc;

use reposcan_model::{
    NewRepository, Page, Repository, RepositoryFilter, RepositoryId, RepositoryUpdate,
};
use tracing::info;

use crate::error::Result;
use crate::store::RepositoryStore;

/// Repository registration. Owner and name are always derived from the
/// URL, never accepted from the caller.
#[derive(Clone)]
pub struct RepositoryService {
    repositories: Arc<dyn RepositoryStore>,
}

impl std::fmt::Debug for RepositoryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryService").finish_non_exhaustive()
    }
}

impl RepositoryService {
    pub fn new(repositories: Arc<dyn RepositoryStore>) -> Self {
        Self { repositories }
    }

    pub async fn create_repository(&self, repository_url: &str) -> Result<Repository> {
        let parsed = NewRepository::parse(repository_url)?;
        let repository = self.repositories.create(&parsed).await?;
        info!(
            repository_id = %repository.id,
            owner = %repository.owner,
            repo = %repository.name,
            "repository registered"
        );
        Ok(repository)
    }

    pub async fn get_repository(&self, id: RepositoryId) -> Result<Repository> {
        self.repositories.get_by_id(id).await
    }

    pub async fn list_repositories(
        &self,
        filter: &RepositoryFilter,
        page: Page,
    ) -> Result<Vec<Repository>> {
        self.repositories.list(filter, page).await
    }

    /// Point a repository at a new URL; owner and name are re-derived.
    pub async fn update_repository(
        &self,
        id: RepositoryId,
        repository_url: &str,
    ) -> Result<Repository> {
        let parsed = NewRepository::parse(repository_url)?;
        self.repositories
            .update(id, &RepositoryUpdate::from(parsed))
            .await
    }

    pub async fn delete_repository(&self, id: RepositoryId) -> Result<()> {
        self.repositories.delete(id).await?;
        info!(repository_id = %id, "repository deleted");
        Ok(())
    }
}
