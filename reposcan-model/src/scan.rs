use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::ids::{RepositoryId, ScanId};
use crate::repository::Repository;

/// Lifecycle state of a scan.
///
/// Scans only move forward: `Pending < Queued < InProgress < {Success, Failure}`.
/// `Success` and `Failure` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScanStatus {
    Pending,
    Queued,
    #[serde(rename = "In Progress")]
    InProgress,
    Success,
    Failure,
}

impl ScanStatus {
    pub const ALL: [ScanStatus; 5] = [
        ScanStatus::Pending,
        ScanStatus::Queued,
        ScanStatus::InProgress,
        ScanStatus::Success,
        ScanStatus::Failure,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ScanStatus::Pending => "Pending",
            ScanStatus::Queued => "Queued",
            ScanStatus::InProgress => "In Progress",
            ScanStatus::Success => "Success",
            ScanStatus::Failure => "Failure",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ScanStatus::Success | ScanStatus::Failure)
    }

    fn rank(self) -> u8 {
        match self {
            ScanStatus::Pending => 0,
            ScanStatus::Queued => 1,
            ScanStatus::InProgress => 2,
            ScanStatus::Success | ScanStatus::Failure => 3,
        }
    }

    /// Whether a scan currently in `self` may be moved to `next`.
    pub fn can_transition_to(self, next: ScanStatus) -> bool {
        !self.is_terminal() && self.rank() <= next.rank()
    }

    /// Statuses a scan may currently hold for a move to `next` to apply.
    pub fn predecessors(next: ScanStatus) -> Vec<ScanStatus> {
        Self::ALL
            .into_iter()
            .filter(|current| current.can_transition_to(next))
            .collect()
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScanStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ModelError::UnknownStatus(s.to_string()))
    }
}

/// One execution attempt of repository inspection.
///
/// Repository identity is copied in at creation time so later edits to the
/// repository record do not rewrite scan history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scan {
    pub id: ScanId,
    pub repository_id: RepositoryId,
    pub repository_name: String,
    pub repository_url: String,
    pub findings: Option<serde_json::Value>,
    pub status: ScanStatus,
    pub queued_at: Option<DateTime<Utc>>,
    pub scanning_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for a fresh scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewScan {
    pub repository_id: RepositoryId,
    pub repository_name: String,
    pub repository_url: String,
    pub status: ScanStatus,
}

impl NewScan {
    pub fn for_repository(repository: &Repository) -> Self {
        Self {
            repository_id: repository.id,
            repository_name: repository.name.clone(),
            repository_url: repository.repository_url.clone(),
            status: ScanStatus::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_round_trip() {
        for status in ScanStatus::ALL {
            assert_eq!(status.as_str().parse::<ScanStatus>(), Ok(status));
        }
        assert_eq!(
            serde_json::to_string(&ScanStatus::InProgress).unwrap(),
            "\"In Progress\""
        );
        assert!("in progress".parse::<ScanStatus>().is_err());
    }

    #[test]
    fn terminal_states_are_absorbing() {
        for next in ScanStatus::ALL {
            assert!(!ScanStatus::Success.can_transition_to(next));
            assert!(!ScanStatus::Failure.can_transition_to(next));
        }
    }

    #[test]
    fn transitions_only_move_forward() {
        assert!(ScanStatus::Pending.can_transition_to(ScanStatus::Queued));
        assert!(ScanStatus::Queued.can_transition_to(ScanStatus::InProgress));
        assert!(ScanStatus::Queued.can_transition_to(ScanStatus::Failure));
        assert!(ScanStatus::InProgress.can_transition_to(ScanStatus::Success));
        assert!(!ScanStatus::InProgress.can_transition_to(ScanStatus::Queued));
        assert!(!ScanStatus::Queued.can_transition_to(ScanStatus::Pending));
    }

    #[test]
    fn failure_predecessors_exclude_terminal_states() {
        let preds = ScanStatus::predecessors(ScanStatus::Failure);
        assert_eq!(
            preds,
            vec![
                ScanStatus::Pending,
                ScanStatus::Queued,
                ScanStatus::InProgress
            ]
        );
    }
}
