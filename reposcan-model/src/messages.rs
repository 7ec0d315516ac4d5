//! JSON payloads carried on the request and result topics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::finding::Finding;
use crate::ids::ScanId;
use crate::scan::ScanStatus;

/// Published by the trigger path, consumed by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequestMessage {
    pub scan_id: ScanId,
    pub owner: String,
    pub repository: String,
}

/// Published by workers, consumed by the orchestrator.
///
/// `scan_status` stays a plain string on the wire so that statuses added by
/// newer workers can be recognised and skipped instead of failing to decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResultMessage {
    pub scan_id: ScanId,
    pub scan_status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub findings: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scanning_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ScanResultMessage {
    pub fn in_progress(scan_id: ScanId, scanning_at: DateTime<Utc>) -> Self {
        Self {
            scan_id,
            scan_status: ScanStatus::InProgress.as_str().to_string(),
            findings: None,
            scanning_at: Some(scanning_at),
            finished_at: None,
        }
    }

    /// An empty finding list is carried as an absent payload, never `null`.
    pub fn success(
        scan_id: ScanId,
        finished_at: DateTime<Utc>,
        findings: &[Finding],
    ) -> serde_json::Result<Self> {
        let findings = if findings.is_empty() {
            None
        } else {
            Some(serde_json::to_value(findings)?)
        };

        Ok(Self {
            scan_id,
            scan_status: ScanStatus::Success.as_str().to_string(),
            findings,
            scanning_at: None,
            finished_at: Some(finished_at),
        })
    }

    pub fn failure(scan_id: ScanId, finished_at: DateTime<Utc>) -> Self {
        Self {
            scan_id,
            scan_status: ScanStatus::Failure.as_str().to_string(),
            findings: None,
            scanning_at: None,
            finished_at: Some(finished_at),
        }
    }

    /// The recognised status, if any.
    pub fn status(&self) -> Option<ScanStatus> {
        self.scan_status.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_success_omits_findings() {
        let at = Utc::now();
        let message = ScanResultMessage::success(ScanId(9), at, &[]).unwrap();
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(value["scan_status"], json!("Success"));
        assert!(value.get("findings").is_none());
        assert!(value.get("scanning_at").is_none());
        assert!(value.get("finished_at").is_some());
    }

    #[test]
    fn unknown_status_decodes() {
        let message: ScanResultMessage = serde_json::from_value(json!({
            "scan_id": 4,
            "scan_status": "Paused"
        }))
        .unwrap();

        assert_eq!(message.scan_id, ScanId(4));
        assert_eq!(message.status(), None);
    }

    #[test]
    fn request_message_shape() {
        let message = ScanRequestMessage {
            scan_id: ScanId(1),
            owner: "acme".into(),
            repository: "widgets".into(),
        };
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({"scan_id": 1, "owner": "acme", "repository": "widgets"})
        );
    }
}
