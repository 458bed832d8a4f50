use serde::{Deserialize, Serialize};

/// Envelope wrapped around every paginated list response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paginated<T> {
    /// 1-based number of the page being returned.
    pub page: u64,
    /// Number of pages available (never less than 1).
    pub count: u64,
    pub next: Option<String>,
    pub previous: Option<String>,
    /// Number of items across all pages.
    pub total: u64,
    pub results: Vec<T>,
}

impl<T> Paginated<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paginated<U> {
        Paginated {
            page: self.page,
            count: self.count,
            next: self.next,
            previous: self.previous,
            total: self.total,
            results: self.results.into_iter().map(f).collect(),
        }
    }
}
