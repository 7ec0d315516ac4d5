use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::ids::RepositoryId;

/// A source-code repository registered for scanning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Repository {
    pub id: RepositoryId,
    pub name: String,
    pub owner: String,
    pub repository_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A repository that has been validated but not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRepository {
    pub owner: String,
    pub name: String,
    pub repository_url: String,
}

impl NewRepository {
    /// Parse owner and name out of a URL such as
    /// `https://github.com/alice/myrepo`.
    ///
    /// The URL must split into exactly five `/`-delimited segments; the
    /// fourth and fifth are taken as owner and name.
    pub fn parse(repository_url: &str) -> Result<Self> {
        let segments: Vec<&str> = repository_url.split('/').collect();
        if segments.len() != 5 {
            return Err(ModelError::InvalidRepositoryUrl(
                repository_url.to_string(),
            ));
        }

        let owner = segments[3];
        let name = segments[4];
        if owner.is_empty() || name.is_empty() {
            return Err(ModelError::InvalidRepositoryUrl(
                repository_url.to_string(),
            ));
        }

        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
            repository_url: repository_url.to_string(),
        })
    }
}
