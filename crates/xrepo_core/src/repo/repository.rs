//! Generic transactional repository over one entity type.
//!
//! # Responsibility
//! - CRUD staging, ordered and paged reads, relation loading and
//!   transaction-scoped execution for any `T: Entity`.
//!
//! # Invariants
//! - Filters, sort strings and include names are resolved before any store
//!   access; a bad name fails with zero queries issued.
//! - Writes are staged in the session and persist only on `save` (or at
//!   the end of `run_in_transaction`). `delete_where` is the exception: it
//!   runs at the store immediately.

use crate::model::entity::{find_relation, Entity, RelationKind};
use crate::model::value::FieldValue;
use crate::query::filter::Filter;
use crate::query::ordering::OrderingTransform;
use crate::query::paged::{self, PageRequest, PageResult};
use crate::query::source::{QuerySource, Tracking};
use crate::repo::error::{RepoError, RepoResult};
use crate::session::{EntitySet, EntityState, Session, SqliteQuery};
use std::fmt::Display;

/// Options shared by list-style reads.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub filter: Option<Filter>,
    pub includes: Vec<String>,
    pub tracking: Tracking,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn include(mut self, relation: impl Into<String>) -> Self {
        self.includes.push(relation.into());
        self
    }

    pub fn no_tracking(mut self) -> Self {
        self.tracking = Tracking::NoTracking;
        self
    }
}

pub struct Repository<'s, T: Entity> {
    set: EntitySet<'s, T>,
}

impl<T: Entity> Clone for Repository<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Entity> Copy for Repository<'_, T> {}

impl<'s, T: Entity> Repository<'s, T> {
    pub fn new(session: &'s Session) -> Self {
        Self {
            set: session.set::<T>(),
        }
    }

    pub fn session(&self) -> &'s Session {
        self.set.session()
    }

    /// Unexecuted query with includes and tracking applied.
    pub fn queryable(&self, tracking: Tracking, includes: &[&str]) -> RepoResult<SqliteQuery<'s, T>> {
        let query = includes
            .iter()
            .try_fold(self.set.query(), |query, relation| query.include(relation))?;
        Ok(match tracking {
            Tracking::Tracked => query,
            Tracking::NoTracking => query.no_tracking(),
        })
    }

    fn prepare(&self, options: &ReadOptions) -> RepoResult<SqliteQuery<'s, T>> {
        let includes: Vec<&str> = options.includes.iter().map(String::as_str).collect();
        let query = self.queryable(options.tracking, &includes)?;
        match &options.filter {
            Some(filter) => query.filter_by(filter),
            None => Ok(query),
        }
    }

    pub fn get_list(
        &self,
        options: &ReadOptions,
        ordering: Option<&OrderingTransform<T>>,
    ) -> RepoResult<Vec<T>> {
        let query = self.prepare(options)?;
        match ordering {
            Some(ordering) => ordering.apply(query).to_vec(),
            None => query.to_vec(),
        }
    }

    /// Parses `order`, then filters and orders at the store.
    ///
    /// # Errors
    /// - `PropertyNotFound` for an unknown sort field, before any query runs.
    pub fn get_ordered_list(&self, options: &ReadOptions, order: &str) -> RepoResult<Vec<T>> {
        let ordering = OrderingTransform::<T>::parse(order)?;
        self.get_list(options, Some(&ordering))
    }

    pub fn get_first(
        &self,
        options: &ReadOptions,
        ordering: Option<&OrderingTransform<T>>,
    ) -> RepoResult<Option<T>> {
        let query = self.prepare(options)?;
        match ordering {
            Some(ordering) => ordering.apply(query).first(),
            None => query.first(),
        }
    }

    /// # Errors
    /// - `MultipleResults` when more than one row matches.
    pub fn get_single(&self, options: &ReadOptions) -> RepoResult<Option<T>> {
        let mut found = self.prepare(options)?.take(2).to_vec()?;
        if found.len() > 1 {
            return Err(RepoError::MultipleResults { entity: T::NAME });
        }
        Ok(found.pop())
    }

    pub fn exists(&self, filter: &Filter) -> RepoResult<bool> {
        self.set.query().filter_by(filter)?.any()
    }

    pub fn count(&self) -> RepoResult<usize> {
        self.set.query().count()
    }

    pub fn count_where(&self, filter: &Filter) -> RepoResult<usize> {
        self.set.query().filter_by(filter)?.count()
    }

    /// Tracked copy first, then the store.
    pub fn find(&self, key: impl Into<FieldValue>) -> RepoResult<Option<T>> {
        self.set.find(key)
    }

    pub fn insert(&self, entity: T) -> RepoResult<()> {
        self.set.add(entity)
    }

    /// Stages every entity in order; stops at the first failure, keeping
    /// the ones staged before it.
    pub fn insert_range(&self, entities: impl IntoIterator<Item = T>) -> RepoResult<()> {
        entities
            .into_iter()
            .try_for_each(|entity| self.set.add(entity))
    }

    pub fn update(&self, entity: T) -> RepoResult<()> {
        self.set.update(entity)
    }

    pub fn delete(&self, entity: &T) -> RepoResult<()> {
        self.set.remove(entity)
    }

    /// # Errors
    /// - `NotFound` when the key is neither tracked nor stored.
    pub fn delete_by_key(&self, key: impl Into<FieldValue>) -> RepoResult<()> {
        self.set.remove_by_key(key)
    }

    /// Removes every stored row matching `filter`, `batch_size` rows per
    /// statement (the configured default when `None`). Returns rows removed.
    ///
    /// Tracked copies of removed rows are left in the tracker.
    pub fn delete_where(&self, filter: &Filter, batch_size: Option<usize>) -> RepoResult<usize> {
        let resolved = filter.resolve::<T>()?;
        let batch_size = batch_size.unwrap_or(self.session().options().delete_batch_size);
        self.set.delete_where(&resolved, batch_size)
    }

    /// Page request at `page` using the configured default size.
    pub fn page_request(&self, page: usize) -> PageRequest {
        PageRequest::new(page, self.session().options().default_page_size)
    }

    pub fn get_paged(
        &self,
        filter: Option<&Filter>,
        order: &str,
        request: PageRequest,
    ) -> RepoResult<PageResult<T>> {
        self.get_paged_with(filter, order, request, |entity| entity)
    }

    /// Paged read with every entity mapped through `projection`.
    pub fn get_paged_with<R, F>(
        &self,
        filter: Option<&Filter>,
        order: &str,
        request: PageRequest,
        projection: F,
    ) -> RepoResult<PageResult<R>>
    where
        F: FnMut(T) -> R,
    {
        let filter = filter.map(Filter::resolve::<T>).transpose()?;
        let ordering = OrderingTransform::<T>::parse(order)?;
        let ordering = (!ordering.is_empty()).then_some(&ordering);
        paged::get_paged_with(
            self.set.query(),
            filter.as_ref(),
            ordering,
            request,
            projection,
        )
    }

    /// Fills the named collection relation of `entity` from the store.
    pub fn load_collection(&self, entity: &mut T, relation: &str) -> RepoResult<()> {
        self.load_relation(entity, relation, RelationKind::Collection)
    }

    /// Fills the named reference relation of `entity` from the store.
    pub fn load_reference(&self, entity: &mut T, relation: &str) -> RepoResult<()> {
        self.load_relation(entity, relation, RelationKind::Reference)
    }

    fn load_relation(&self, entity: &mut T, name: &str, kind: RelationKind) -> RepoResult<()> {
        let relation = find_relation::<T>(name)
            .filter(|relation| relation.kind == kind)
            .ok_or_else(|| RepoError::RelationNotFound {
                entity: T::NAME,
                name: name.to_string(),
            })?;
        let session = self.session();
        session.checkpoint()?;
        (relation.load)(session.connection(), entity)?;
        Ok(())
    }

    /// Flushes every pending change of the session, not only this type's.
    pub fn save(&self) -> RepoResult<usize> {
        self.session().save_changes()
    }

    pub fn run_in_transaction<R, E, F>(&self, work: F) -> Result<R, E>
    where
        F: FnOnce() -> Result<R, E>,
        E: From<RepoError> + Display,
    {
        self.session().run_in_transaction(work)
    }

    pub fn entry_state(&self, entity: &T) -> EntityState {
        self.set.state(entity)
    }

    /// Tracked copy for `key`, without touching the store.
    pub fn tracked(&self, key: impl Into<FieldValue>) -> Option<T> {
        self.set.tracked(key)
    }
}
