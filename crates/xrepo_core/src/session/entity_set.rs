//! Per-type view of a session: queries plus change staging.
//!
//! # Responsibility
//! - Start store-backed queries for `T`.
//! - Stage inserts, updates and deletes in the change tracker.
//! - Run set-based deletes that bypass tracking.
//!
//! # Invariants
//! - Staging never touches the store; `Session::save_changes` does.
//! - Removing an Added entity detaches it instead of staging a delete.

use crate::model::entity::Entity;
use crate::model::value::FieldValue;
use crate::query::filter::ResolvedFilter;
use crate::query::quote_ident;
use crate::repo::error::{RepoError, RepoResult};
use crate::session::query::SqliteQuery;
use crate::session::sql;
use crate::session::tracker::EntityState;
use crate::session::Session;
use log::{error, info};
use rusqlite::params_from_iter;
use std::marker::PhantomData;
use std::time::Instant;

pub struct EntitySet<'s, T: Entity> {
    session: &'s Session,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Clone for EntitySet<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Entity> Copy for EntitySet<'_, T> {}

impl<'s, T: Entity> EntitySet<'s, T> {
    pub(crate) fn new(session: &'s Session) -> Self {
        Self {
            session,
            _entity: PhantomData,
        }
    }

    pub fn session(&self) -> &'s Session {
        self.session
    }

    pub fn query(&self) -> SqliteQuery<'s, T> {
        SqliteQuery::new(self.session)
    }

    /// Stages `entity` for insertion.
    ///
    /// # Errors
    /// - `AlreadyTracked` when an entity with the same key is tracked.
    pub fn add(&self, entity: T) -> RepoResult<()> {
        self.session
            .tracker_mut()
            .track(entity, EntityState::Added)
    }

    /// Starts tracking `entity` as Unchanged.
    pub fn attach(&self, entity: T) -> RepoResult<()> {
        self.session
            .tracker_mut()
            .track(entity, EntityState::Unchanged)
    }

    /// Stages every column of `entity` for update.
    ///
    /// A pending insert stays an insert carrying the new values.
    pub fn update(&self, entity: T) -> RepoResult<()> {
        let mut tracker = self.session.tracker_mut();
        let state = match tracker.state_of::<T>(&entity.key()) {
            EntityState::Added => EntityState::Added,
            EntityState::Detached => return tracker.track(entity, EntityState::Modified),
            EntityState::Unchanged | EntityState::Modified | EntityState::Deleted => {
                EntityState::Modified
            }
        };
        tracker.restage(entity, state);
        Ok(())
    }

    /// Stages `entity` for deletion.
    pub fn remove(&self, entity: &T) -> RepoResult<()> {
        self.remove_key(&entity.key(), Some(entity))
    }

    /// Stages deletion by key. Untracked keys are checked against the store.
    ///
    /// # Errors
    /// - `NotFound` when nothing with `key` is tracked or stored.
    pub fn remove_by_key(&self, key: impl Into<FieldValue>) -> RepoResult<()> {
        let key = key.into();
        if self.session.tracker().state_of::<T>(&key) != EntityState::Detached {
            return self.remove_key(&key, None);
        }
        self.session.checkpoint()?;
        let Some(stored) = sql::fetch_by_key::<T>(self.session.connection(), &key)? else {
            return Err(RepoError::NotFound {
                entity: T::NAME,
                key: key.to_string(),
            });
        };
        self.session
            .tracker_mut()
            .track(stored, EntityState::Deleted)
    }

    fn remove_key(&self, key: &FieldValue, entity: Option<&T>) -> RepoResult<()> {
        let mut tracker = self.session.tracker_mut();
        match tracker.state_of::<T>(key) {
            EntityState::Added => tracker.detach::<T>(key),
            EntityState::Detached => match entity {
                Some(entity) => tracker.track(entity.clone(), EntityState::Deleted)?,
                None => {
                    return Err(RepoError::NotFound {
                        entity: T::NAME,
                        key: key.to_string(),
                    })
                }
            },
            EntityState::Unchanged | EntityState::Modified | EntityState::Deleted => {
                tracker.set_state::<T>(key, EntityState::Deleted);
            }
        }
        Ok(())
    }

    /// Returns the tracked copy for `key`, or loads and attaches it.
    ///
    /// Entities staged for deletion are reported as absent.
    pub fn find(&self, key: impl Into<FieldValue>) -> RepoResult<Option<T>> {
        let key = key.into();
        {
            let tracker = self.session.tracker();
            if let Some(tracked) = tracker.get::<T>(&key) {
                return Ok(match tracker.state_of::<T>(&key) {
                    EntityState::Deleted => None,
                    _ => Some(tracked.entity.clone()),
                });
            }
        }
        self.session.checkpoint()?;
        match sql::fetch_by_key::<T>(self.session.connection(), &key)? {
            Some(stored) => Ok(Some(self.session.identity_resolve(stored))),
            None => Ok(None),
        }
    }

    pub fn state(&self, entity: &T) -> EntityState {
        self.state_of_key(&entity.key())
    }

    pub fn state_of_key(&self, key: &FieldValue) -> EntityState {
        self.session.tracker().state_of::<T>(key)
    }

    /// Tracked copy for `key`, without touching the store.
    pub fn tracked(&self, key: impl Into<FieldValue>) -> Option<T> {
        self.session
            .tracker()
            .get::<T>(&key.into())
            .map(|tracked| tracked.entity.clone())
    }

    /// Deletes every stored row matching `filter` in batches of
    /// `batch_size`, without loading or tracking the rows.
    ///
    /// Runs inside the open transaction when there is one; otherwise each
    /// batch commits on its own.
    ///
    /// # Errors
    /// - `InvalidBatchSize` when `batch_size == 0`.
    pub fn delete_where(&self, filter: &ResolvedFilter<T>, batch_size: usize) -> RepoResult<usize> {
        if batch_size == 0 {
            return Err(RepoError::InvalidBatchSize);
        }
        let started_at = Instant::now();
        let mut predicate = String::new();
        let mut params = Vec::new();
        filter.write_sql(&mut predicate, &mut params);

        let table = quote_ident(T::TABLE);
        let key = quote_ident(T::KEY_COLUMN);
        let sql = format!(
            "DELETE FROM {table} WHERE {key} IN (SELECT {key} FROM {table} WHERE {predicate} LIMIT {batch_size})"
        );

        let mut deleted = 0_usize;
        let mut batches = 0_usize;
        let outcome = loop {
            if let Err(err) = self.session.checkpoint() {
                break Err(err);
            }
            let affected = self
                .session
                .connection()
                .prepare_cached(&sql)
                .and_then(|mut stmt| stmt.execute(params_from_iter(params.iter())));
            match affected {
                Ok(affected) => {
                    deleted += affected;
                    batches += 1;
                    if affected < batch_size {
                        break Ok(deleted);
                    }
                }
                Err(err) => break Err(RepoError::from(err)),
            }
        };

        match &outcome {
            Ok(_) => info!(
                "event=delete_where module=session status=ok entity={} rows={} batches={} duration_ms={}",
                T::NAME,
                deleted,
                batches,
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=delete_where module=session status=error entity={} rows={} duration_ms={} error={}",
                T::NAME,
                deleted,
                started_at.elapsed().as_millis(),
                err
            ),
        }
        outcome
    }
}
