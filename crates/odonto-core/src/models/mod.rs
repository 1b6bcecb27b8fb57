//! Domain models for the clinic.

mod appointment;
mod chat;
mod inventory;
mod invoice;
mod odontogram;
mod patient;
mod procedure;
mod schedule;
mod treatment;
mod user;

pub use appointment::*;
pub use chat::*;
pub use inventory::*;
pub use invoice::*;
pub use odontogram::*;
pub use patient::*;
pub use procedure::*;
pub use schedule::*;
pub use treatment::*;
pub use user::*;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Audit columns carried by every persisted entity.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Audit {
    pub created_at: String,
    pub updated_at: String,
    /// Email of the user that created the row
    pub created_by: Option<String>,
    /// Email of the user that last modified the row
    pub updated_by: Option<String>,
}

impl Audit {
    pub fn now() -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            created_at: now.clone(),
            updated_at: now,
            created_by: None,
            updated_by: None,
        }
    }
}

/// Returned when a stored or user-supplied code matches no variant.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Zero-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
}

impl PageRequest {
    pub fn new(page: u32, size: u32) -> Self {
        Self {
            page,
            size: size.max(1),
        }
    }

    pub fn offset(&self) -> i64 {
        self.page as i64 * self.size as i64
    }

    pub fn limit(&self) -> i64 {
        self.size as i64
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 0, size: 10 }
    }
}

/// One page of results plus the total row count.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub size: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, request: PageRequest) -> Self {
        Self {
            items,
            total,
            page: request.page,
            size: request.size,
        }
    }

    pub fn total_pages(&self) -> u32 {
        if self.size == 0 {
            return 0;
        }
        self.total.div_ceil(self.size as u64) as u32
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            size: self.size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_request_offset() {
        let req = PageRequest::new(2, 25);
        assert_eq!(req.offset(), 50);
        assert_eq!(req.limit(), 25);

        // size is never zero
        assert_eq!(PageRequest::new(0, 0).size, 1);
    }

    #[test]
    fn test_total_pages() {
        let page: Page<u32> = Page::new(vec![1, 2], 21, PageRequest::new(0, 10));
        assert_eq!(page.total_pages(), 3);

        let empty: Page<u32> = Page::new(vec![], 0, PageRequest::default());
        assert_eq!(empty.total_pages(), 0);
    }
}
