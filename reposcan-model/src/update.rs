//! Typed sparse updates.
//!
//! Each field is applied only when it is `Some`; everything else on the
//! stored record is left untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::repository::{NewRepository, Repository};
use crate::scan::{Scan, ScanStatus};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ScanStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub findings: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queued_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scanning_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ScanUpdate {
    pub fn status(status: ScanStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn queued(at: DateTime<Utc>) -> Self {
        Self {
            status: Some(ScanStatus::Queued),
            queued_at: Some(at),
            ..Self::default()
        }
    }

    pub fn with_findings(mut self, findings: Option<serde_json::Value>) -> Self {
        self.findings = findings;
        self
    }

    pub fn with_queued_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.queued_at = at;
        self
    }

    pub fn with_scanning_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.scanning_at = at;
        self
    }

    pub fn with_finished_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.finished_at = at;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.findings.is_none()
            && self.queued_at.is_none()
            && self.scanning_at.is_none()
            && self.finished_at.is_none()
    }

    /// Mirror the update onto an in-memory record.
    pub fn apply_to(&self, scan: &mut Scan) {
        if let Some(status) = self.status {
            scan.status = status;
        }
        if let Some(findings) = &self.findings {
            scan.findings = Some(findings.clone());
        }
        if let Some(at) = self.queued_at {
            scan.queued_at = Some(at);
        }
        if let Some(at) = self.scanning_at {
            scan.scanning_at = Some(at);
        }
        if let Some(at) = self.finished_at {
            scan.finished_at = Some(at);
        }
    }
}

/// Sparse update of a repository record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryUpdate {
    pub owner: Option<String>,
    pub name: Option<String>,
    pub repository_url: Option<String>,
}

impl RepositoryUpdate {
    pub fn is_empty(&self) -> bool {
        self.owner.is_none()
            && self.name.is_none()
            && self.repository_url.is_none()
    }

    pub fn apply_to(&self, repository: &mut Repository) {
        if let Some(owner) = &self.owner {
            repository.owner = owner.clone();
        }
        if let Some(name) = &self.name {
            repository.name = name.clone();
        }
        if let Some(url) = &self.repository_url {
            repository.repository_url = url.clone();
        }
    }
}

impl From<NewRepository> for RepositoryUpdate {
    fn from(parsed: NewRepository) -> Self {
        Self {
            owner: Some(parsed.owner),
            name: Some(parsed.name),
            repository_url: Some(parsed.repository_url),
        }
    }
}
