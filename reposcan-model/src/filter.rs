use serde::{Deserialize, Serialize};

use crate::ids::RepositoryId;
use crate::scan::ScanStatus;

pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Offset pagination, 1-based pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub page: u32,
    pub size: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: 1,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Page {
    /// Missing or zero values fall back to page 1 and the default size.
    pub fn new(page: Option<u32>, size: Option<u32>) -> Self {
        Self {
            page: page.filter(|p| *p > 0).unwrap_or(1),
            size: size.filter(|s| *s > 0).unwrap_or(DEFAULT_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.size)
    }

    pub fn limit(&self) -> u64 {
        u64::from(self.size)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanFilter {
    pub repository_id: Option<RepositoryId>,
    pub repository_name: Option<String>,
    pub status: Option<ScanStatus>,
}

impl ScanFilter {
    pub fn matches(
        &self,
        repository_id: RepositoryId,
        name: &str,
        status: ScanStatus,
    ) -> bool {
        self.repository_id.is_none_or(|id| id == repository_id)
            && self.repository_name.as_deref().is_none_or(|n| n == name)
            && self.status.is_none_or(|s| s == status)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryFilter {
    pub owner: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_is_zero_based() {
        assert_eq!(Page::new(Some(1), Some(20)).offset(), 0);
        assert_eq!(Page::new(Some(3), Some(10)).offset(), 20);
        assert_eq!(Page::new(None, None), Page::default());
        assert_eq!(Page::new(Some(0), Some(0)).offset(), 0);
    }
}
