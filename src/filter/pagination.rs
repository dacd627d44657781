use serde::Serialize;

/// Largest offset or limit a SQL backend accepts (`BIGINT`).
pub const MAX_OFFSET: u64 = i64::MAX as u64;

/// A validated page request. Only exists when pagination is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageLink {
    pub page: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Pagination {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<PageLink>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev: Option<PageLink>,
}

impl PageRequest {
    /// Interpret raw `page`/`limit` values.
    ///
    /// Pagination is off (`None`) when `limit` is absent, zero, negative or
    /// not an integer, or when `page` is present but not a positive integer.
    /// `page` defaults to 1. `limit` above `max_limit` is capped, and neither
    /// `limit` nor the resulting skip ever exceeds [`MAX_OFFSET`].
    pub fn from_params(page: Option<&str>, limit: Option<&str>, max_limit: Option<u64>) -> Option<Self> {
        let limit = limit?.trim().parse::<u64>().ok().filter(|l| *l > 0)?;
        let page = match page {
            None => 1,
            Some(raw) => raw.trim().parse::<u64>().ok().filter(|p| *p > 0)?,
        };
        let limit = match max_limit {
            Some(max) if limit > max => {
                tracing::warn!("Limit {} exceeds max {}, capping to max", limit, max);
                max
            }
            _ => limit,
        };
        Some(Self { page, limit: limit.min(MAX_OFFSET) })
    }

    pub fn skip(&self) -> u64 {
        (self.page - 1).saturating_mul(self.limit).min(MAX_OFFSET)
    }

    /// `next` iff another page follows `total` matches, `prev` iff this page
    /// does not start at the first document.
    pub fn links(&self, total: u64) -> Pagination {
        let skip = self.skip();
        Pagination {
            next: (skip.saturating_add(self.limit) < total).then(|| PageLink { page: self.page.saturating_add(1), limit: self.limit }),
            prev: (skip > 0).then(|| PageLink { page: self.page - 1, limit: self.limit }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_zero_or_garbage_limit_disables_pagination() {
        for limit in [None, Some("0"), Some("abc"), Some("-5"), Some(""), Some("2.5")] {
            assert_eq!(PageRequest::from_params(Some("1"), limit, None), None, "limit {:?}", limit);
        }
    }

    #[test]
    fn garbage_page_disables_pagination() {
        for page in ["0", "-1", "two", ""] {
            assert_eq!(PageRequest::from_params(Some(page), Some("10"), None), None, "page {:?}", page);
        }
    }

    #[test]
    fn page_defaults_to_one() {
        let req = PageRequest::from_params(None, Some("10"), None).unwrap();
        assert_eq!(req, PageRequest { page: 1, limit: 10 });
        assert_eq!(req.skip(), 0);
    }

    #[test]
    fn limit_is_capped() {
        let req = PageRequest::from_params(Some("3"), Some("500"), Some(100)).unwrap();
        assert_eq!(req.limit, 100);
        assert_eq!(req.skip(), 200);
    }

    #[test]
    fn huge_pages_stay_within_sql_offsets() {
        let req = PageRequest::from_params(Some("18446744073709551615"), Some("10"), None).unwrap();
        assert_eq!(req.skip(), MAX_OFFSET);
        let links = req.links(25);
        assert_eq!(links.next, None);
        assert_eq!(links.prev, Some(PageLink { page: u64::MAX - 1, limit: 10 }));

        let req = PageRequest::from_params(Some("2"), Some("18446744073709551615"), None).unwrap();
        assert_eq!(req.limit, MAX_OFFSET);
        assert_eq!(req.skip(), MAX_OFFSET);
    }

    #[test]
    fn links_follow_skip_arithmetic() {
        for total in 0..40u64 {
            for page in 1..6u64 {
                for limit in 1..12u64 {
                    let req = PageRequest { page, limit };
                    let skip = (page - 1) * limit;
                    assert_eq!(req.skip(), skip);
                    let links = req.links(total);
                    assert_eq!(links.next.is_some(), skip + limit < total);
                    assert_eq!(links.prev.is_some(), skip > 0);
                    if let Some(next) = links.next {
                        assert_eq!(next, PageLink { page: page + 1, limit });
                    }
                    if let Some(prev) = links.prev {
                        assert_eq!(prev, PageLink { page: page - 1, limit });
                    }
                }
            }
        }
    }
}
