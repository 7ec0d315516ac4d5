use serde::{Deserialize, Serialize};

use crate::ids::ScanId;

/// Job type used to route scan jobs to their handler.
pub const SCAN_SOURCE_CODE_JOB: &str = "scan_source_code";

/// Job queue payload for one scan execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanJobPayload {
    pub scan_id: ScanId,
    pub owner_name: String,
    pub repo_name: String,
}
