//! Pagination types for list operations

use serde::{Deserialize, Serialize};

/// Pagination parameters for list queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum number of items to return (default: 20, max: 100)
    #[serde(default = "default_limit")]
    pub limit: i64,
    /// Number of items to skip (default: 0)
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 20,
            offset: 0,
        }
    }
}

impl Pagination {
    /// Create pagination with custom limit
    #[must_use]
    pub fn with_limit(limit: i64) -> Self {
        Self {
            limit: limit.min(100),
            ..Default::default()
        }
    }

    /// Get clamped limit (max 100)
    #[must_use]
    pub fn clamped_limit(&self) -> i64 {
        self.limit.clamp(1, 100)
    }
}

/// A page of results from a list query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    /// The items in this page
    pub items: Vec<T>,
    /// Total number of items matching the query
    pub total: i64,
    /// Limit used for this query
    pub limit: i64,
    /// Offset used for this query
    pub offset: i64,
}

impl<T> Page<T> {
    /// Create a new page from items and pagination info
    #[must_use]
    pub fn new(items: Vec<T>, total: i64, pagination: &Pagination) -> Self {
        Self {
            items,
            total,
            limit: pagination.limit,
            offset: pagination.offset,
        }
    }

    /// Check if there are more items after this page
    #[must_use]
    pub fn has_more(&self) -> bool {
        self.offset + (self.items.len() as i64) < self.total
    }

    /// Map items to a different type
    pub fn map<U, F>(self, f: F) -> Page<U>
    where
        F: FnMut(T) -> U,
    {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            limit: self.limit,
            offset: self.offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_default() {
        let p = Pagination::default();
        assert_eq!(p.limit, 20);
        assert_eq!(p.offset, 0);
    }

    #[test]
    fn test_pagination_clamped_limit() {
        let p = Pagination {
            limit: 500,
            ..Default::default()
        };
        assert_eq!(p.clamped_limit(), 100);
    }

    #[test]
    fn test_page_has_more() {
        let pagination = Pagination::default();
        let page: Page<i32> = Page::new(vec![1, 2, 3], 50, &pagination);
        assert!(page.has_more());

        let page: Page<i32> = Page::new(vec![1, 2, 3], 3, &pagination);
        assert!(!page.has_more());
    }
}
