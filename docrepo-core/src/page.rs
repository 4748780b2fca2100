//! Page windows over repository queries.
//!
//! The store does the slicing: the repository asks for one window of results
//! plus the total match count, and [`PaginationParams::to_page`] attaches the
//! navigation links.

use serde::{Deserialize, Serialize};

/// One window of a larger result set.
///
/// ```ignore
/// let page = users
///     .get_page(Filter::all(), SortSpec::asc("name"), &PaginationParams::new(2, 25))
///     .await?;
///
/// if let Some(next) = page.next_page {
///     // fetch PaginationParams::new(next, 25)
/// }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Number of matches across all pages.
    pub count: usize,
    pub next_page: Option<usize>,
    pub previous_page: Option<usize>,
}

impl<T> Page<T> {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Converts the items while keeping the navigation metadata.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            count: self.count,
            next_page: self.next_page,
            previous_page: self.previous_page,
        }
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            count: 0,
            next_page: None,
            previous_page: None,
        }
    }
}

/// A 1-based page number and a page size.
///
/// Page `0` is read as the first page.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationParams {
    pub page: usize,
    pub per_page: usize,
}

impl PaginationParams {
    pub const DEFAULT_PER_PAGE: usize = 10;

    pub fn new(page: usize, per_page: usize) -> Self {
        Self { page, per_page }
    }

    pub fn first(per_page: usize) -> Self {
        Self::new(1, per_page)
    }

    /// The page that follows this one, with the same size.
    pub fn next(&self) -> Self {
        Self::new(self.page.max(1) + 1, self.per_page)
    }

    /// Number of matches skipped before this page.
    pub fn offset(&self) -> usize {
        self.page.saturating_sub(1).saturating_mul(self.per_page)
    }

    /// Wraps one fetched window of `items` out of `total` matches.
    pub fn to_page<T>(&self, items: Vec<T>, total: usize) -> Page<T> {
        let page = self.page.max(1);
        let end = self.offset() + items.len();

        Page {
            next_page: (end < total && !items.is_empty()).then_some(page + 1),
            previous_page: (page > 1).then_some(page - 1),
            count: total,
            items,
        }
    }
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self::first(Self::DEFAULT_PER_PAGE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn middle_page_links_both_ways() {
        let page = PaginationParams::new(2, 10).to_page((11..=20).collect::<Vec<_>>(), 35);

        assert_eq!(page.count, 35);
        assert_eq!(page.next_page, Some(3));
        assert_eq!(page.previous_page, Some(1));
    }

    #[test]
    fn last_page_has_no_next() {
        let page = PaginationParams::new(4, 10).to_page((31..=35).collect::<Vec<_>>(), 35);

        assert_eq!(page.next_page, None);
        assert_eq!(page.items.len(), 5);
    }

    #[test]
    fn page_past_the_end_is_empty_and_terminal() {
        let page = PaginationParams::new(9, 10).to_page(Vec::<i32>::new(), 35);

        assert!(page.is_empty());
        assert_eq!(page.next_page, None);
        assert_eq!(page.previous_page, Some(8));
    }

    #[test]
    fn page_zero_is_treated_as_first() {
        let params = PaginationParams::new(0, 10);

        assert_eq!(params.offset(), 0);
        assert_eq!(params.next(), PaginationParams::new(2, 10));
        assert_eq!(params.to_page(vec![1], 5).previous_page, None);
        assert_eq!(PaginationParams::default().next().offset(), 10);
    }

    #[test]
    fn map_keeps_links() {
        let page = PaginationParams::new(1, 2).to_page(vec![1, 2], 3).map(|n| n * 10);

        assert_eq!(page.items, vec![10, 20]);
        assert_eq!(page.next_page, Some(2));
    }
}
