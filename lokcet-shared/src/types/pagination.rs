use serde::{Deserialize, Serialize};

const MAX_PER_PAGE: u64 = 100;

/// `?page=&per_page=` query, one-based.
#[derive(Debug, Clone, Deserialize)]
pub struct PaginationParams {
    #[serde(default = "first_page")]
    pub page: u64,
    #[serde(default = "default_per_page", alias = "perPage")]
    pub per_page: u64,
}

fn first_page() -> u64 { 1 }
fn default_per_page() -> u64 { 20 }

impl PaginationParams {
    pub fn new(page: u64, per_page: u64) -> Self {
        Self { page, per_page }
    }

    pub fn limit(&self) -> usize {
        self.per_page.clamp(1, MAX_PER_PAGE) as usize
    }

    /// Saturates for pages far past the end instead of overflowing.
    pub fn offset(&self) -> usize {
        let skipped = usize::try_from(self.page.max(1) - 1).unwrap_or(usize::MAX);
        skipped.saturating_mul(self.limit())
    }
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self::new(first_page(), default_per_page())
    }
}

/// One page of a list the service has already merged and ordered in memory.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub has_more: bool,
}

impl<T> Paginated<T> {
    pub fn from_ordered(all: Vec<T>, params: &PaginationParams) -> Self {
        let total = all.len();
        let offset = params.offset();
        let items: Vec<T> = all.into_iter().skip(offset).take(params.limit()).collect();
        let has_more = offset.saturating_add(items.len()) < total;
        Self {
            items,
            total: total as u64,
            page: params.page.max(1),
            has_more,
        }
    }
}
