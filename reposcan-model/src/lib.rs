//! Core data model definitions shared across reposcan crates.
#![allow(missing_docs)]

pub mod error;
pub mod filter;
pub mod finding;
pub mod ids;
pub mod job;
pub mod messages;
pub mod repository;
pub mod scan;
pub mod update;

pub use error::ModelError;
pub use filter::{Page, RepositoryFilter, ScanFilter};
pub use finding::{Begin, Finding, FindingMetadata, Location, Position};
pub use ids::{RepositoryId, ScanId};
pub use job::{SCAN_SOURCE_CODE_JOB, ScanJobPayload};
pub use messages::{ScanRequestMessage, ScanResultMessage};
pub use repository::{NewRepository, Repository};
pub use scan::{NewScan, Scan, ScanStatus};
pub use update::{RepositoryUpdate, ScanUpdate};
