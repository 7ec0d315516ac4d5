use reposcan_model::{ModelError, ScanId, ScanStatus};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("scan {scan_id} cannot move from {from} to {to}")]
    InvalidTransition {
        scan_id: ScanId,
        from: ScanStatus,
        to: ScanStatus,
    },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Message channel error: {0}")]
    Channel(String),

    #[error("Job queue error: {0}")]
    Queue(String),

    #[error("Archive download failed: {0}")]
    Fetch(String),

    #[error("Archive extraction failed: {0}")]
    Archive(String),

    #[error("empty repository directory for {owner}/{repo}")]
    EmptyRepository { owner: String, repo: String },

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScanError {
    /// Errors that retrying cannot fix. The job queue dead-letters these
    /// instead of spending the retry budget on them.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ScanError::Validation(_)
                | ScanError::Serialization(_)
                | ScanError::EmptyRepository { .. }
                | ScanError::InvalidTransition { .. }
        )
    }
}

impl From<ModelError> for ScanError {
    fn from(err: ModelError) -> Self {
        ScanError::Validation(err.to_string())
    }
}

impl From<sqlx::Error> for ScanError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => {
                ScanError::NotFound("record not found".to_string())
            }
            other => ScanError::Database(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for ScanError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        ScanError::Database(format!("migration failed: {err}"))
    }
}

impl From<redis::RedisError> for ScanError {
    fn from(err: redis::RedisError) -> Self {
        ScanError::Channel(err.to_string())
    }
}

impl From<reqwest::Error> for ScanError {
    fn from(err: reqwest::Error) -> Self {
        ScanError::Fetch(err.to_string())
    }
}

impl From<walkdir::Error> for ScanError {
    fn from(err: walkdir::Error) -> Self {
        ScanError::Io(err.into())
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_classification() {
        assert!(ScanError::Validation("bad".into()).is_permanent());
        assert!(
            ScanError::EmptyRepository {
                owner: "acme".into(),
                repo: "widgets".into()
            }
            .is_permanent()
        );
        assert!(!ScanError::Fetch("502".into()).is_permanent());
        assert!(!ScanError::Channel("down".into()).is_permanent());
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        let err: ScanError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, ScanError::NotFound(_)));
    }

    #[test]
    fn empty_repository_message() {
        let err = ScanError::EmptyRepository {
            owner: "acme".into(),
            repo: "widgets".into(),
        };
        assert_eq!(err.to_string(), "empty repository directory for acme/widgets");
    }
}
