use std::fmt;
use std::sync::Arc;

use reposcan_core::orchestration::{RepositoryService, ScanService};

#[derive(Clone)]
pub struct AppState {
    pub repositories: Arc<RepositoryService>,
    pub scans: Arc<ScanService>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
