//! Store-backed query source.
//!
//! # Responsibility
//! - Accumulate filter, order, window and include steps and render them as
//!   one SELECT when materialized.
//!
//! # Invariants
//! - Nothing touches the store until `count`, `any` or `to_vec`.
//! - ORDER BY is always emitted ahead of LIMIT/OFFSET.
//! - Tracked materialization returns the session's copy for entities that
//!   are already tracked.

use crate::model::entity::{find_relation, Entity, Relation};
use crate::model::value::FieldValue;
use crate::query::accessor::Accessor;
use crate::query::filter::ResolvedFilter;
use crate::query::quote_ident;
use crate::query::sort::SortDirection;
use crate::query::source::{QuerySource, Tracking};
use crate::repo::error::{RepoError, RepoResult};
use crate::session::sql::select_sql;
use crate::session::Session;
use log::debug;
use rusqlite::params_from_iter;

pub struct SqliteQuery<'s, T: Entity> {
    session: &'s Session,
    predicates: Vec<String>,
    params: Vec<FieldValue>,
    order: Vec<String>,
    offset: usize,
    limit: Option<usize>,
    includes: Vec<&'static Relation<T>>,
    tracking: Tracking,
}

impl<'s, T: Entity> SqliteQuery<'s, T> {
    pub(crate) fn new(session: &'s Session) -> Self {
        Self {
            session,
            predicates: Vec::new(),
            params: Vec::new(),
            order: Vec::new(),
            offset: 0,
            limit: None,
            includes: Vec::new(),
            tracking: Tracking::default(),
        }
    }

    pub fn tracking(&self) -> Tracking {
        self.tracking
    }

    /// SELECT statement this query would run, with `?` placeholders.
    pub fn to_sql(&self) -> String {
        let mut sql = select_sql::<T>();
        self.push_where(&mut sql);
        if !self.order.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order.join(", "));
        }
        self.push_window(&mut sql);
        sql
    }

    fn push_where(&self, sql: &mut String) {
        if !self.predicates.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.predicates.join(" AND "));
        }
    }

    fn push_window(&self, sql: &mut String) {
        // SQLite reads integer literals past i64::MAX as REAL; no table
        // holds that many rows, so clamping keeps the result unchanged.
        let clamp = |n: usize| n.min(i64::MAX as usize);
        match (self.limit.map(clamp), clamp(self.offset)) {
            (None, 0) => {}
            (None, offset) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            (Some(limit), 0) => sql.push_str(&format!(" LIMIT {limit}")),
            (Some(limit), offset) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
        }
    }

    fn has_window(&self) -> bool {
        self.limit.is_some() || self.offset > 0
    }

    fn order_term(accessor: Accessor<T>, direction: SortDirection) -> String {
        format!("{} {}", quote_ident(accessor.column()), direction.as_sql())
    }
}

impl<T: Entity> QuerySource<T> for SqliteQuery<'_, T> {
    fn filter(mut self, filter: &ResolvedFilter<T>) -> Self {
        let mut predicate = String::new();
        filter.write_sql(&mut predicate, &mut self.params);
        self.predicates.push(predicate);
        self
    }

    fn include(mut self, relation: &str) -> RepoResult<Self> {
        let found = find_relation::<T>(relation).ok_or_else(|| RepoError::RelationNotFound {
            entity: T::NAME,
            name: relation.to_string(),
        })?;
        if !self
            .includes
            .iter()
            .any(|included| std::ptr::eq(*included, found))
        {
            self.includes.push(found);
        }
        Ok(self)
    }

    fn order_by(mut self, accessor: Accessor<T>, direction: SortDirection) -> Self {
        self.order = vec![Self::order_term(accessor, direction)];
        self
    }

    fn then_by(mut self, accessor: Accessor<T>, direction: SortDirection) -> Self {
        self.order.push(Self::order_term(accessor, direction));
        self
    }

    fn skip(mut self, count: usize) -> Self {
        self.offset = self.offset.saturating_add(count);
        self.limit = self.limit.map(|limit| limit.saturating_sub(count));
        self
    }

    fn take(mut self, count: usize) -> Self {
        self.limit = Some(self.limit.map_or(count, |limit| limit.min(count)));
        self
    }

    fn count(&self) -> RepoResult<usize> {
        self.session.checkpoint()?;
        let sql = if self.has_window() {
            let mut inner = format!("SELECT 1 FROM {}", quote_ident(T::TABLE));
            self.push_where(&mut inner);
            self.push_window(&mut inner);
            format!("SELECT COUNT(*) FROM ({inner})")
        } else {
            let mut sql = format!("SELECT COUNT(*) FROM {}", quote_ident(T::TABLE));
            self.push_where(&mut sql);
            sql
        };
        let count: i64 = self
            .session
            .connection()
            .prepare_cached(&sql)?
            .query_row(params_from_iter(self.params.iter()), |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn any(&self) -> RepoResult<bool> {
        self.session.checkpoint()?;
        let mut inner = format!("SELECT 1 FROM {}", quote_ident(T::TABLE));
        self.push_where(&mut inner);
        self.push_window(&mut inner);
        let sql = format!("SELECT EXISTS({inner})");
        let found = self
            .session
            .connection()
            .prepare_cached(&sql)?
            .query_row(params_from_iter(self.params.iter()), |row| row.get(0))?;
        Ok(found)
    }

    fn to_vec(self) -> RepoResult<Vec<T>> {
        self.session.checkpoint()?;
        let sql = self.to_sql();
        debug!(
            "event=query module=session entity={} includes={} tracking={:?}",
            T::NAME,
            self.includes.len(),
            self.tracking
        );

        let conn = self.session.connection();
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params_from_iter(self.params.iter()), |row| T::from_row(row))?;
        let loaded = rows.collect::<rusqlite::Result<Vec<T>>>()?;

        let mut resolved: Vec<T> = match self.tracking {
            Tracking::NoTracking => loaded,
            Tracking::Tracked => loaded
                .into_iter()
                .map(|entity| self.session.identity_resolve(entity))
                .collect(),
        };
        for entity in &mut resolved {
            for relation in &self.includes {
                self.session.checkpoint()?;
                (relation.load)(conn, entity)?;
            }
        }
        Ok(resolved)
    }

    fn no_tracking(mut self) -> Self {
        self.tracking = Tracking::NoTracking;
        self
    }
}
