// src/utils/pagination.rs

//! Page-based pagination for list endpoints.
//!
//! `page` is 1-indexed (default 1); `limit` is clamped to 1..=100 (default 20).

use serde::{Deserialize, Serialize};

pub const DEFAULT_LIMIT: i64 = 20;
pub const MAX_LIMIT: i64 = 100;

#[derive(Debug, Default, Clone, Deserialize)]
pub struct PaginationParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl PaginationParams {
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1) * self.limit()
    }

    pub fn meta(&self, total: i64) -> PaginationMeta {
        let limit = self.limit();
        PaginationMeta {
            page: self.page(),
            limit,
            total,
            total_pages: (total + limit - 1) / limit,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PaginationMeta {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

/// List response envelope: `{ "items": [...], "pagination": {...} }`.
#[derive(Debug, Serialize)]
pub struct Paginated<T: Serialize> {
    pub items: Vec<T>,
    pub pagination: PaginationMeta,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let p = PaginationParams::default();
        assert_eq!(p.page(), 1);
        assert_eq!(p.limit(), 20);
        assert_eq!(p.offset(), 0);
    }

    #[test]
    fn clamps_out_of_range_values() {
        let p = PaginationParams {
            page: Some(0),
            limit: Some(1000),
        };
        assert_eq!(p.page(), 1);
        assert_eq!(p.limit(), 100);
    }

    #[test]
    fn offset_and_total_pages() {
        let p = PaginationParams {
            page: Some(3),
            limit: Some(10),
        };
        assert_eq!(p.offset(), 20);

        let meta = p.meta(21);
        assert_eq!(meta.total_pages, 3);
        assert_eq!(p.meta(0).total_pages, 0);
    }
}
