//! Skip/limit pagination shared by every listing.

use serde::Serialize;

pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// A 1-based page request. Construction clamps out-of-range values instead of
/// rejecting them: page numbers below one read page one and page sizes below
/// one read a single item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: u32,
    limit: u32,
}

impl PageRequest {
    pub fn new(page: i64, limit: i64) -> Self {
        Self {
            page: page.clamp(1, u32::MAX as i64) as u32,
            limit: limit.clamp(1, u32::MAX as i64) as u32,
        }
    }

    /// Missing values fall back to page one and [`DEFAULT_PAGE_SIZE`].
    pub fn from_optional(page: Option<i64>, limit: Option<i64>) -> Self {
        Self::new(page.unwrap_or(1), limit.unwrap_or(DEFAULT_PAGE_SIZE as i64))
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn skip(&self) -> u64 {
        (self.page as u64 - 1) * self.limit as u64
    }

    pub(crate) fn sql_limit(&self) -> i64 {
        self.limit as i64
    }

    pub(crate) fn sql_offset(&self) -> i64 {
        i64::try_from(self.skip()).unwrap_or(i64::MAX)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, DEFAULT_PAGE_SIZE as i64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub current_page: u32,
    pub page_size: u32,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, request: PageRequest) -> Self {
        Self {
            items,
            total,
            current_page: request.page(),
            page_size: request.limit(),
            total_pages: total.div_ceil(request.limit() as u64),
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            current_page: self.current_page,
            page_size: self.page_size,
            total_pages: self.total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_is_derived_from_one_based_page() {
        let request = PageRequest::new(3, 10);
        assert_eq!(request.skip(), 20);
        assert_eq!(request.limit(), 10);
    }

    #[test]
    fn out_of_range_requests_are_clamped() {
        let request = PageRequest::new(0, 0);
        assert_eq!(request.page(), 1);
        assert_eq!(request.limit(), 1);
        assert_eq!(request.skip(), 0);

        let request = PageRequest::new(-4, -9);
        assert_eq!(request, PageRequest::new(1, 1));
    }

    #[test]
    fn total_pages_rounds_up() {
        let page: Page<u8> = Page::new(Vec::new(), 25, PageRequest::new(4, 10));
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.current_page, 4);

        let empty: Page<u8> = Page::new(Vec::new(), 0, PageRequest::default());
        assert_eq!(empty.total_pages, 0);
    }

    #[test]
    fn page_serializes_camel_case() {
        let page = Page::new(vec![1, 2], 2, PageRequest::default());
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["totalPages"], 1);
        assert_eq!(json["currentPage"], 1);
        assert_eq!(json["items"].as_array().map(Vec::len), Some(2));
    }
}
