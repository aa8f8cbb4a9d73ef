//! Query source contract and the in-memory implementation.
//!
//! # Responsibility
//! - Define the composable operations the orchestration layer drives.
//! - Provide `MemoryQuery`, a vector-backed source with eager semantics.
//!
//! # Invariants
//! - `order_by` starts a new ordering; `then_by` only breaks ties left by
//!   the keys issued before it.
//! - `MemoryQuery` sorting is stable: rows equal on every key keep their
//!   input order.

use crate::model::entity::{find_relation, Entity};
use crate::query::accessor::Accessor;
use crate::query::filter::{Filter, ResolvedFilter};
use crate::query::ordering::{compare_keys, OrderKey};
use crate::query::sort::SortDirection;
use crate::repo::error::{RepoError, RepoResult};

/// Whether materialized entities are registered with the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Tracking {
    #[default]
    Tracked,
    NoTracking,
}

/// Composable, filterable, orderable, windowable collection of `T`.
///
/// Sources are consumed and returned by each builder step. Ordering is
/// expected before windowing; store-backed sources always emit ORDER BY
/// ahead of LIMIT/OFFSET.
pub trait QuerySource<T: Entity>: Sized {
    fn filter(self, filter: &ResolvedFilter<T>) -> Self;

    /// Eager-loads the named relation on every materialized entity.
    fn include(self, relation: &str) -> RepoResult<Self>;

    /// Primary order. Replaces any ordering issued before.
    fn order_by(self, accessor: Accessor<T>, direction: SortDirection) -> Self;

    /// Tie-break order chained after the keys issued so far.
    fn then_by(self, accessor: Accessor<T>, direction: SortDirection) -> Self;

    fn skip(self, count: usize) -> Self;

    fn take(self, count: usize) -> Self;

    /// Counts rows after filtering, before any window.
    fn count(&self) -> RepoResult<usize>;

    fn any(&self) -> RepoResult<bool>;

    fn to_vec(self) -> RepoResult<Vec<T>>;

    fn no_tracking(self) -> Self;

    /// Resolves and applies an unresolved filter.
    fn filter_by(self, filter: &Filter) -> RepoResult<Self> {
        Ok(self.filter(&filter.resolve::<T>()?))
    }

    fn first(self) -> RepoResult<Option<T>> {
        Ok(self.take(1).to_vec()?.into_iter().next())
    }
}

/// Vector-backed source. Each step is applied immediately.
pub struct MemoryQuery<T: Entity> {
    items: Vec<T>,
    keys: Vec<OrderKey<T>>,
}

impl<T: Entity> MemoryQuery<T> {
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            items: items.into_iter().collect(),
            keys: Vec::new(),
        }
    }

    fn sort(&mut self) {
        let keys = &self.keys;
        self.items.sort_by(|left, right| compare_keys(keys, left, right));
    }
}

impl<T: Entity> QuerySource<T> for MemoryQuery<T> {
    fn filter(mut self, filter: &ResolvedFilter<T>) -> Self {
        self.items.retain(|item| filter.matches(item));
        self
    }

    /// Relations are validated but not loaded; in-memory rows carry whatever
    /// the caller put in them.
    fn include(self, relation: &str) -> RepoResult<Self> {
        if find_relation::<T>(relation).is_none() {
            return Err(RepoError::RelationNotFound {
                entity: T::NAME,
                name: relation.to_string(),
            });
        }
        Ok(self)
    }

    fn order_by(mut self, accessor: Accessor<T>, direction: SortDirection) -> Self {
        self.keys = vec![OrderKey {
            accessor,
            direction,
        }];
        self.sort();
        self
    }

    fn then_by(mut self, accessor: Accessor<T>, direction: SortDirection) -> Self {
        self.keys.push(OrderKey {
            accessor,
            direction,
        });
        self.sort();
        self
    }

    fn skip(mut self, count: usize) -> Self {
        let count = count.min(self.items.len());
        self.items.drain(..count);
        self
    }

    fn take(mut self, count: usize) -> Self {
        self.items.truncate(count);
        self
    }

    fn count(&self) -> RepoResult<usize> {
        Ok(self.items.len())
    }

    fn any(&self) -> RepoResult<bool> {
        Ok(!self.items.is_empty())
    }

    fn to_vec(self) -> RepoResult<Vec<T>> {
        Ok(self.items)
    }

    fn no_tracking(self) -> Self {
        self
    }
}
