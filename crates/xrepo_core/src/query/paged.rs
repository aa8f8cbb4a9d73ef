//! Paged retrieval over any query source.
//!
//! # Responsibility
//! - Count the filtered source, window it and compute page metadata.
//!
//! # Invariants
//! - `row_count` is taken after filtering and before the window.
//! - `page_count = ceil(row_count / size)` with real-number division.
//! - Requests with `page == 0` or `size == 0` are rejected, never clamped.
//!   So are windows whose skipped row count exceeds `i64::MAX`, the
//!   largest OFFSET the store accepts.
//! - Row membership across pages is deterministic only when the caller
//!   supplies an ordering or the source has a natural order.

use crate::config::DEFAULT_PAGE_SIZE;
use crate::model::entity::Entity;
use crate::query::filter::ResolvedFilter;
use crate::query::ordering::OrderingTransform;
use crate::query::source::QuerySource;
use crate::repo::error::{RepoError, RepoResult};
use serde::{Deserialize, Serialize};

/// One-based page window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: usize,
    pub size: usize,
}

/// First page at the built-in default size. Against a configured store,
/// `Repository::page_request` applies `StoreOptions::default_page_size`.
impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    pub fn new(page: usize, size: usize) -> Self {
        Self { page, size }
    }

    /// Number of rows before this page.
    pub fn skip(&self) -> usize {
        self.page.saturating_sub(1).saturating_mul(self.size)
    }

    fn validate(&self) -> RepoResult<()> {
        let window_fits = self
            .page
            .saturating_sub(1)
            .checked_mul(self.size)
            .is_some_and(|skip| i64::try_from(skip).is_ok());
        if self.page == 0 || self.size == 0 || !window_fits {
            return Err(RepoError::InvalidPageRequest {
                page: self.page,
                size: self.size,
            });
        }
        Ok(())
    }
}

/// One materialized page plus navigation metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult<R> {
    pub items: Vec<R>,
    /// One-based current page.
    pub current: usize,
    pub page_count: usize,
    pub size: usize,
    pub row_count: usize,
}

impl<R> PageResult<R> {
    /// One-based index of the first row on this page.
    pub fn first_row(&self) -> usize {
        self.current
            .saturating_sub(1)
            .saturating_mul(self.size)
            .saturating_add(1)
    }

    pub fn last_row(&self) -> usize {
        self.current.saturating_mul(self.size).min(self.row_count)
    }

    pub fn has_previous(&self) -> bool {
        self.current > 1
    }

    pub fn has_next(&self) -> bool {
        self.current < self.page_count
    }

    /// Maps the items, keeping the metadata.
    pub fn map<U>(self, f: impl FnMut(R) -> U) -> PageResult<U> {
        PageResult {
            items: self.items.into_iter().map(f).collect(),
            current: self.current,
            page_count: self.page_count,
            size: self.size,
            row_count: self.row_count,
        }
    }
}

/// Number of pages needed for `row_count` rows.
pub fn page_count(row_count: usize, size: usize) -> usize {
    (row_count as f64 / size as f64).ceil() as usize
}

/// Returns one page of raw entities.
pub fn get_paged<T, Q>(
    source: Q,
    filter: Option<&ResolvedFilter<T>>,
    ordering: Option<&OrderingTransform<T>>,
    request: PageRequest,
) -> RepoResult<PageResult<T>>
where
    T: Entity,
    Q: QuerySource<T>,
{
    get_paged_with(source, filter, ordering, request, |entity| entity)
}

/// Returns one page with every entity mapped through `projection`.
pub fn get_paged_with<T, Q, R, F>(
    source: Q,
    filter: Option<&ResolvedFilter<T>>,
    ordering: Option<&OrderingTransform<T>>,
    request: PageRequest,
    projection: F,
) -> RepoResult<PageResult<R>>
where
    T: Entity,
    Q: QuerySource<T>,
    F: FnMut(T) -> R,
{
    request.validate()?;

    let source = match filter {
        Some(filter) => source.filter(filter),
        None => source,
    };
    let row_count = source.count()?;

    let source = match ordering {
        Some(ordering) => ordering.apply(source),
        None => source,
    };
    let items = source
        .skip(request.skip())
        .take(request.size)
        .to_vec()?
        .into_iter()
        .map(projection)
        .collect();

    Ok(PageResult {
        items,
        current: request.page,
        page_count: page_count(row_count, request.size),
        size: request.size,
        row_count,
    })
}

#[cfg(test)]
mod tests {
    use super::{get_paged, get_paged_with, page_count, PageRequest, PageResult};
    use crate::model::entity::{Entity, Field};
    use crate::model::value::FieldValue;
    use crate::query::filter::Filter;
    use crate::query::ordering::OrderingTransform;
    use crate::query::source::MemoryQuery;
    use crate::repo::error::RepoError;
    use rusqlite::Row;

    #[derive(Debug, Clone)]
    struct Num {
        value: i64,
    }

    static NUM_FIELDS: &[Field<Num>] = &[Field::new("Value", "value", |n| {
        FieldValue::from(n.value)
    })];

    impl Entity for Num {
        const NAME: &'static str = "Num";
        const TABLE: &'static str = "nums";
        const KEY_COLUMN: &'static str = "value";

        fn fields() -> &'static [Field<Self>] {
            NUM_FIELDS
        }

        fn key(&self) -> FieldValue {
            FieldValue::from(self.value)
        }

        fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
            Ok(Self {
                value: row.get("value")?,
            })
        }
    }

    fn rows(count: i64) -> MemoryQuery<Num> {
        MemoryQuery::new((1..=count).rev().map(|value| Num { value }))
    }

    #[test]
    fn first_page_metadata() {
        let ordering = OrderingTransform::<Num>::parse("value").unwrap();
        let page = get_paged(rows(25), None, Some(&ordering), PageRequest::new(1, 10)).unwrap();

        assert_eq!(page.row_count, 25);
        assert_eq!(page.page_count, 3);
        assert_eq!(page.first_row(), 1);
        assert_eq!(page.last_row(), 10);
        assert!(page.has_next());
        assert!(!page.has_previous());
        assert_eq!(page.items.len(), 10);
        assert_eq!(page.items[0].value, 1);
    }

    #[test]
    fn last_partial_page() {
        let ordering = OrderingTransform::<Num>::parse("value").unwrap();
        let page = get_paged(rows(25), None, Some(&ordering), PageRequest::new(3, 10)).unwrap();

        assert_eq!(page.first_row(), 21);
        assert_eq!(page.last_row(), 25);
        assert!(!page.has_next());
        assert!(page.has_previous());
        let values: Vec<i64> = page.items.iter().map(|n| n.value).collect();
        assert_eq!(values, vec![21, 22, 23, 24, 25]);
    }

    #[test]
    fn count_is_taken_after_filter() {
        let filter = Filter::le("value", 12).resolve::<Num>().unwrap();
        let page = get_paged_with(
            rows(25),
            Some(&filter),
            None,
            PageRequest::new(2, 5),
            |n| n.value * 10,
        )
        .unwrap();

        assert_eq!(page.row_count, 12);
        assert_eq!(page.page_count, 3);
        assert_eq!(page.items, vec![70, 60, 50, 40, 30]);
    }

    #[test]
    fn page_count_rounds_up() {
        assert_eq!(page_count(25, 10), 3);
        assert_eq!(page_count(20, 10), 2);
        assert_eq!(page_count(0, 10), 0);
    }

    #[test]
    fn zero_sized_request_is_rejected() {
        let err = get_paged(rows(3), None, None, PageRequest::new(1, 0)).unwrap_err();
        assert!(matches!(err, RepoError::InvalidPageRequest { page: 1, size: 0 }));
        assert!(get_paged(rows(3), None, None, PageRequest::new(0, 5)).is_err());
    }

    #[test]
    fn page_result_serializes_items_and_metadata() {
        let page = get_paged_with(rows(3), None, None, PageRequest::default(), |n| n.value)
            .unwrap();
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["row_count"], 3);
        assert_eq!(json["page_count"], 1);
        assert_eq!(json["items"], serde_json::json!([3, 2, 1]));
    }

    #[test]
    fn windows_past_the_offset_range_are_rejected() {
        let err = get_paged(rows(1), None, None, PageRequest::new(usize::MAX, 2)).unwrap_err();
        assert!(matches!(err, RepoError::InvalidPageRequest { size: 2, .. }));

        let largest = PageRequest::new(i64::MAX as usize + 1, 1);
        assert_eq!(largest.skip(), i64::MAX as usize);
        let page = get_paged(rows(1), None, None, largest).unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.last_row(), 1);
        assert!(get_paged(rows(1), None, None, PageRequest::new(i64::MAX as usize + 2, 1)).is_err());
    }

    #[test]
    fn row_bounds_saturate() {
        let page = PageResult::<i64> {
            items: Vec::new(),
            current: usize::MAX,
            page_count: 1,
            size: 2,
            row_count: 1,
        };
        assert_eq!(page.first_row(), usize::MAX);
        assert_eq!(page.last_row(), 1);
    }

    #[test]
    fn default_request_matches_default_store_options() {
        let options = crate::config::StoreOptions::default();
        assert_eq!(
            PageRequest::default(),
            PageRequest::new(1, options.default_page_size)
        );
    }
}
