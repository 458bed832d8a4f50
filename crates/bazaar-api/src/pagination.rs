//! Page-number pagination for list endpoints.

use axum::{
    extract::{FromRequestParts, Query},
    http::request::Parts,
};
use bazaar_db::models::PageRequest;
use bazaar_types::pagination::Paginated;

use crate::error::ApiError;
use crate::state::AppState;

pub const DEFAULT_PAGE_SIZE: u64 = 100;
pub const MAX_PAGE_SIZE: u64 = 1000;

/// Requested page plus what is needed to build next/previous links.
#[derive(Debug, Clone)]
pub struct Pagination {
    page: u64,
    page_size: u64,
    path: String,
    /// Raw query segments other than `page`, kept in their original encoding.
    other_params: Vec<String>,
    base_url: Option<String>,
}

impl Pagination {
    fn parse(path: &str, query: Option<&str>, base_url: Option<String>) -> Result<Self, ApiError> {
        let mut page = 1;
        let mut page_size = DEFAULT_PAGE_SIZE;
        let mut other_params = Vec::new();

        for segment in query.unwrap_or_default().split('&').filter(|s| !s.is_empty()) {
            let (key, value) = segment.split_once('=').unwrap_or((segment, ""));
            match key {
                "page" => {
                    page = value
                        .parse::<u64>()
                        .ok()
                        .filter(|p| *p >= 1)
                        .ok_or_else(invalid_page)?;
                }
                "page_size" => {
                    // Unusable sizes fall back to the default.
                    if let Some(size) = value.parse::<u64>().ok().filter(|s| *s >= 1) {
                        page_size = size.min(MAX_PAGE_SIZE);
                    }
                    other_params.push(segment.to_string());
                }
                _ => other_params.push(segment.to_string()),
            }
        }

        // The offset must fit the i64 the queries bind.
        (page - 1)
            .checked_mul(page_size)
            .filter(|offset| *offset <= i64::MAX as u64)
            .ok_or_else(invalid_page)?;

        Ok(Self {
            page,
            page_size,
            path: path.to_string(),
            other_params,
            base_url,
        })
    }

    pub fn request(&self) -> PageRequest {
        PageRequest {
            limit: self.page_size,
            offset: (self.page - 1) * self.page_size,
        }
    }

    /// Wrap one page of results. Fails when the page lies past the end.
    pub fn finish<T>(&self, results: Vec<T>, total: u64) -> Result<Paginated<T>, ApiError> {
        let count = total.div_ceil(self.page_size).max(1);
        if self.page > count {
            return Err(invalid_page());
        }

        let next = (self.page < count).then(|| self.link(Some(self.page + 1)));
        let previous = (self.page > 1).then(|| match self.page - 1 {
            1 => self.link(None),
            n => self.link(Some(n)),
        });

        Ok(Paginated {
            page: self.page,
            count,
            next,
            previous,
            total,
            results,
        })
    }

    fn link(&self, page: Option<u64>) -> String {
        let mut params = self.other_params.clone();
        if let Some(page) = page {
            params.push(format!("page={}", page));
        }

        let base = self.base_url.as_deref().unwrap_or("").trim_end_matches('/');
        if params.is_empty() {
            format!("{}{}", base, self.path)
        } else {
            format!("{}{}?{}", base, self.path, params.join("&"))
        }
    }
}

fn invalid_page() -> ApiError {
    ApiError::NotFound("Invalid page.".into())
}

impl FromRequestParts<AppState> for Pagination {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        // Reject undecodable query strings up front.
        Query::<Vec<(String, String)>>::try_from_uri(&parts.uri)
            .map_err(|e| ApiError::Validation(e.body_text()))?;

        Self::parse(parts.uri.path(), parts.uri.query(), state.public_url.clone())
    }
}
