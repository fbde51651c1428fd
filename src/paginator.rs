// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Page-number pagination over an already-ordered candidate set.

use crate::config::PaginationConfig;
use crate::error::{ApiError, Result};

/// Which page the client asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageNumber {
    Number(usize),
    Last,
}

/// Page selection parsed from the query string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub number: PageNumber,
    pub size: usize,
}

impl PageRequest {
    /// Parse `page` and `page_size` parameters.
    ///
    /// A missing `page` means the first page. A bad `page` is a
    /// [`ApiError::PageNotFound`]; a bad or zero `page_size` falls back to
    /// the configured size, and large sizes are capped.
    pub fn from_params(
        page: Option<&str>,
        page_size: Option<&str>,
        config: &PaginationConfig,
    ) -> Result<Self> {
        let number = match page.map(str::trim) {
            None | Some("") => PageNumber::Number(1),
            Some("last") => PageNumber::Last,
            Some(raw) => match raw.parse::<usize>() {
                Ok(n) if n >= 1 => PageNumber::Number(n),
                _ => return Err(ApiError::PageNotFound),
            },
        };

        let size = page_size
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .filter(|size| *size > 0)
            .map(|size| size.min(config.max_page_size))
            .unwrap_or(config.page_size)
            .max(1);

        Ok(Self { number, size })
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// Size of the whole candidate set
    pub count: usize,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
    /// 1-based page number that was served
    pub number: usize,
}

/// Number of pages for `count` items. An empty set still has one page.
pub fn page_count(count: usize, size: usize) -> usize {
    count.div_ceil(size.max(1)).max(1)
}

/// Slice `items` into the requested page.
///
/// `page_url` renders the absolute link for a page number and is only
/// called for pages that exist.
pub fn paginate<T>(
    items: Vec<T>,
    request: &PageRequest,
    page_url: impl Fn(usize) -> String,
) -> Result<Page<T>> {
    let count = items.len();
    let pages = page_count(count, request.size);

    let number = match request.number {
        PageNumber::Last => pages,
        PageNumber::Number(n) if n >= 1 && n <= pages => n,
        PageNumber::Number(_) => return Err(ApiError::PageNotFound),
    };

    let start = (number - 1) * request.size;
    let results: Vec<T> = items.into_iter().skip(start).take(request.size).collect();

    Ok(Page {
        count,
        next: (number < pages).then(|| page_url(number + 1)),
        previous: (number > 1).then(|| page_url(number - 1)),
        results,
        number,
    })
}
