//! HTTP handlers, one module per resource.
//!
//! Handlers stay thin: check the caller's role, call one repository or
//! workflow method, shape the response. Business rules live in
//! harvest-core and transactions in harvest-db.

pub mod batches;
pub mod customers;
pub mod events;
pub mod health;
pub mod imports;
pub mod invoices;
pub mod orders;
pub mod payments;
pub mod products;
pub mod reports;
pub mod roles;
pub mod settings;

use axum::http::Uri;
use serde::Deserialize;

use crate::error::ApiError;

/// Default page size for list endpoints.
pub(crate) const DEFAULT_PAGE_SIZE: i64 = 50;
pub(crate) const MAX_PAGE_SIZE: i64 = 200;

/// `?limit=&offset=` on list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct Page {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Page {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// Fallback for unknown paths.
pub async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(format!("No route for {}", uri.path()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_clamps() {
        let page = Page {
            limit: Some(10_000),
            offset: Some(-5),
        };
        assert_eq!(page.limit(), MAX_PAGE_SIZE);
        assert_eq!(page.offset(), 0);
        assert_eq!(Page::default().limit(), DEFAULT_PAGE_SIZE);
    }
}
