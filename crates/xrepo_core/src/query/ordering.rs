//! Composable multi-key ordering transforms.
//!
//! # Responsibility
//! - Build an `OrderingTransform<T>` from a `SortSpec` or typed keys.
//! - Apply it to a `QuerySource` as one primary order plus tie-breakers.
//!
//! # Invariants
//! - All keys are resolved at build time; one unknown field aborts the
//!   whole build and no partial transform is returned.
//! - Primary vs tie-break dispatch is decided by an explicit `ordered` flag
//!   threaded through `apply_from`, never by inspecting the source.

use crate::model::entity::Entity;
use crate::query::accessor::{resolve, Accessor};
use crate::query::sort::{SortDirection, SortSpec};
use crate::query::source::QuerySource;
use crate::repo::error::RepoResult;
use std::cmp::Ordering;

/// One resolved sort key.
pub struct OrderKey<T: 'static> {
    pub accessor: Accessor<T>,
    pub direction: SortDirection,
}

impl<T: 'static> Clone for OrderKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: 'static> Copy for OrderKey<T> {}

impl<T: 'static> std::fmt::Debug for OrderKey<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.accessor.name(), self.direction)
    }
}

/// Ordered list of resolved keys, applicable to any query source.
pub struct OrderingTransform<T: 'static> {
    keys: Vec<OrderKey<T>>,
}

impl<T: 'static> Clone for OrderingTransform<T> {
    fn clone(&self) -> Self {
        Self {
            keys: self.keys.clone(),
        }
    }
}

impl<T: 'static> std::fmt::Debug for OrderingTransform<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.keys.iter()).finish()
    }
}

impl<T: Entity> Default for OrderingTransform<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> OrderingTransform<T> {
    /// Empty transform; applying it leaves the source unordered.
    pub fn new() -> Self {
        Self { keys: Vec::new() }
    }

    /// Resolves every field of `spec` against `T`.
    ///
    /// # Errors
    /// - `PropertyNotFound` for the first field that does not resolve.
    pub fn build(spec: &SortSpec) -> RepoResult<Self> {
        let keys = spec
            .fields()
            .iter()
            .map(|field| {
                Ok(OrderKey {
                    accessor: resolve::<T>(&field.name)?,
                    direction: field.direction,
                })
            })
            .collect::<RepoResult<Vec<_>>>()?;
        Ok(Self { keys })
    }

    /// Parses and builds in one step.
    pub fn parse(spec: &str) -> RepoResult<Self> {
        Self::build(&SortSpec::parse(spec))
    }

    /// Single-key transform by field name.
    pub fn by(name: &str, direction: SortDirection) -> RepoResult<Self> {
        Self::new().then_by_name(name, direction)
    }

    /// Appends a tie-breaker by field name.
    pub fn then_by_name(self, name: &str, direction: SortDirection) -> RepoResult<Self> {
        Ok(self.then(resolve::<T>(name)?, direction))
    }

    /// Appends a tie-breaker from an already resolved accessor.
    pub fn then(mut self, accessor: Accessor<T>, direction: SortDirection) -> Self {
        self.keys.push(OrderKey {
            accessor,
            direction,
        });
        self
    }

    /// Appends all keys of `other` as tie-breakers.
    pub fn chain(mut self, other: OrderingTransform<T>) -> Self {
        self.keys.extend(other.keys);
        self
    }

    pub fn keys(&self) -> &[OrderKey<T>] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Orders an unordered source.
    pub fn apply<Q: QuerySource<T>>(&self, source: Q) -> Q {
        self.apply_from(source, false).0
    }

    /// Applies the keys starting from a known `ordered` state.
    ///
    /// Pass `true` when the caller already issued a primary order, so the
    /// first key becomes a tie-breaker. Returns the source and the state
    /// after the last key.
    pub fn apply_from<Q: QuerySource<T>>(&self, source: Q, ordered: bool) -> (Q, bool) {
        self.keys
            .iter()
            .fold((source, ordered), |(source, ordered), key| {
                let next = if ordered {
                    source.then_by(key.accessor, key.direction)
                } else {
                    source.order_by(key.accessor, key.direction)
                };
                (next, true)
            })
    }

    /// Compares two entities with the same key sequence.
    pub fn compare(&self, left: &T, right: &T) -> Ordering {
        compare_keys(&self.keys, left, right)
    }
}

pub(crate) fn compare_keys<T: Entity>(keys: &[OrderKey<T>], left: &T, right: &T) -> Ordering {
    for key in keys {
        let ordering = key
            .accessor
            .value(left)
            .sort_cmp(&key.accessor.value(right));
        let ordering = match key.direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}
