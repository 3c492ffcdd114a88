//! Page-number pagination shared by item and transaction listings.

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 10_000;

/// 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Pagination {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self { page, page_size }
    }

    /// Reject pages below 1 and sizes outside `1..=max_page_size`.
    pub fn validate(&self, max_page_size: u32) -> LedgerResult<()> {
        if self.page < 1 {
            return Err(LedgerError::invalid("page must be >= 1"));
        }
        if self.page_size < 1 || self.page_size > max_page_size {
            return Err(LedgerError::invalid(format!(
                "page_size must be between 1 and {max_page_size}"
            )));
        }
        Ok(())
    }

    pub fn offset(&self) -> usize {
        (self.page.saturating_sub(1) as usize).saturating_mul(self.page_size as usize)
    }

    pub fn limit(&self) -> usize {
        self.page_size as usize
    }

    /// Cut one page out of an already-ordered, fully materialised result.
    pub fn slice<T: Clone>(&self, all: &[T]) -> Vec<T> {
        all.iter()
            .skip(self.offset())
            .take(self.limit())
            .cloned()
            .collect()
    }
}

/// A page of results plus the totals callers need to render navigation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, pagination: Pagination) -> Self {
        let size = u64::from(pagination.page_size.max(1));
        // An empty result still reports one (empty) page.
        let total_pages = if total == 0 {
            1
        } else {
            u32::try_from(total.div_ceil(size)).unwrap_or(u32::MAX)
        };
        Self {
            items,
            total,
            page: pagination.page,
            page_size: pagination.page_size,
            total_pages,
            has_next_page: pagination.page < total_pages,
            has_previous_page: pagination.page > 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_and_navigation_flags() {
        let page = Page::new(vec![1, 2], 5, Pagination::new(2, 2));
        assert_eq!(page.total_pages, 3);
        assert!(page.has_next_page);
        assert!(page.has_previous_page);

        let last = Page::new(vec![5], 5, Pagination::new(3, 2));
        assert!(!last.has_next_page);
    }

    #[test]
    fn empty_result_reports_a_single_page() {
        let page: Page<u8> = Page::new(vec![], 0, Pagination::default());
        assert_eq!(page.total_pages, 1);
        assert!(!page.has_next_page);
        assert!(!page.has_previous_page);
    }

    #[test]
    fn validation_bounds() {
        assert!(Pagination::new(0, 10).validate(MAX_PAGE_SIZE).is_err());
        assert!(Pagination::new(1, 0).validate(MAX_PAGE_SIZE).is_err());
        assert!(Pagination::new(1, 101).validate(100).is_err());
        assert!(Pagination::new(3, 100).validate(100).is_ok());
    }

    #[test]
    fn slice_skips_previous_pages() {
        let all = (1..=7).collect::<Vec<_>>();
        assert_eq!(Pagination::new(2, 3).slice(&all), vec![4, 5, 6]);
        assert_eq!(Pagination::new(3, 3).slice(&all), vec![7]);
        assert!(Pagination::new(4, 3).slice(&all).is_empty());
    }

    #[test]
    fn serializes_camel_case() {
        let page = Page::new(vec!["a"], 1, Pagination::default());
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["pageSize"], 50);
        assert_eq!(json["hasNextPage"], false);
    }
}
