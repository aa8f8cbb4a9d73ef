//! Database session: one connection, its change tracker and transaction state.
//!
//! # Responsibility
//! - Own the SQLite connection for the lifetime of a unit of work.
//! - Stage entity changes and flush them atomically on `save_changes`.
//! - Run caller work inside one explicit transaction with guaranteed
//!   rollback on every non-success exit.
//!
//! # Invariants
//! - A session is single-threaded (`!Sync`); only its cancellation token
//!   may cross threads.
//! - At most one explicit transaction is open at a time.
//! - A failed `save_changes` or transaction leaves the tracker as it was
//!   before the attempt, so the same work can be retried.

mod cancel;
mod entity_set;
mod query;
pub(crate) mod sql;
mod tracker;

pub use cancel::CancellationToken;
pub use entity_set::EntitySet;
pub use query::SqliteQuery;
pub use sql::{load_one, load_related};
pub use tracker::{EntityState, TrackedEntry};

use crate::config::StoreOptions;
use crate::db::{open_store, open_store_in_memory, Migration};
use crate::logging::sanitize_message;
use crate::model::entity::Entity;
use crate::repo::error::{RepoError, RepoResult};
use log::{debug, error, info, warn};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fmt::Display;
use std::path::Path;
use std::time::Instant;
use tracker::ChangeTracker;
use uuid::Uuid;

const MAX_LOGGED_ERROR_CHARS: usize = 200;

pub struct Session {
    id: Uuid,
    conn: Connection,
    options: StoreOptions,
    tracker: RefCell<ChangeTracker>,
    transaction_open: Cell<bool>,
    cancellation: CancellationToken,
}

impl Session {
    /// Opens a file-backed store, applies `migrations` and starts a session.
    pub fn open(
        path: impl AsRef<Path>,
        options: StoreOptions,
        migrations: &[Migration],
    ) -> RepoResult<Self> {
        let conn = open_store(path, &options, migrations)?;
        Ok(Self::from_connection(conn, options))
    }

    /// Opens a private in-memory store, applies `migrations` and starts a session.
    pub fn open_in_memory(options: StoreOptions, migrations: &[Migration]) -> RepoResult<Self> {
        let conn = open_store_in_memory(&options, migrations)?;
        Ok(Self::from_connection(conn, options))
    }

    /// Wraps an already configured connection.
    pub fn from_connection(conn: Connection, options: StoreOptions) -> Self {
        let id = Uuid::new_v4();
        let cancellation = CancellationToken::for_connection(&conn);
        debug!("event=session_open module=session status=ok session_id={id}");
        Self {
            id,
            conn,
            options,
            tracker: RefCell::new(ChangeTracker::default()),
            transaction_open: Cell::new(false),
            cancellation,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Raw connection, for statements outside the entity model.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Typed view over one entity type.
    pub fn set<T: Entity>(&self) -> EntitySet<'_, T> {
        EntitySet::new(self)
    }

    /// Token that cancels this session's current and future operations.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction_open.get()
    }

    pub fn has_changes(&self) -> bool {
        !self.tracker().pending_in_order().is_empty()
    }

    /// Snapshot of every tracked entry.
    pub fn entries(&self) -> Vec<TrackedEntry> {
        self.tracker().entries()
    }

    /// Flushes every pending change in staging order.
    ///
    /// Outside an explicit transaction the flush runs in its own IMMEDIATE
    /// transaction. Returns the number of flushed entries.
    ///
    /// # Errors
    /// - `Cancelled` when the token fires before or during the flush.
    /// - `NotFound` when an update or delete matches no stored row.
    /// - Store errors from the statements themselves.
    pub fn save_changes(&self) -> RepoResult<usize> {
        self.checkpoint()?;
        let started_at = Instant::now();
        let pending = self.tracker().pending_in_order();
        if pending.is_empty() {
            return Ok(0);
        }

        let result = if self.in_transaction() {
            self.flush(&self.conn, &pending)
        } else {
            Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
                .map_err(RepoError::from)
                .and_then(|tx| {
                    self.flush(&tx, &pending)?;
                    tx.commit()?;
                    Ok(())
                })
        };

        match result {
            Ok(()) => {
                self.tracker_mut().accept_all();
                info!(
                    "event=save_changes module=session status=ok session_id={} entries={} duration_ms={}",
                    self.id,
                    pending.len(),
                    started_at.elapsed().as_millis()
                );
                Ok(pending.len())
            }
            Err(err) => {
                error!(
                    "event=save_changes module=session status=error session_id={} entries={} duration_ms={} error={}",
                    self.id,
                    pending.len(),
                    started_at.elapsed().as_millis(),
                    sanitize_message(&err.to_string(), MAX_LOGGED_ERROR_CHARS)
                );
                Err(err)
            }
        }
    }

    fn flush(&self, conn: &Connection, pending: &[usize]) -> RepoResult<()> {
        let tracker = self.tracker();
        for index in pending {
            self.checkpoint()?;
            tracker.record(*index).flush(conn)?;
        }
        Ok(())
    }

    /// Discards every pending change.
    ///
    /// Added entries are detached. Modified and Deleted entries are reloaded
    /// from the store and become Unchanged, or are detached when the row is
    /// gone. Unchanged entries are left alone.
    ///
    /// # Errors
    /// The pass always visits every entry. An entry whose reload fails keeps
    /// its pending state, and the first such error is returned afterwards.
    pub fn reject_changes(&self) -> RepoResult<()> {
        let mut tracker = self.tracker_mut();
        let mut detached = Vec::new();
        let mut first_error = None;
        for index in 0..tracker.len() {
            let record = tracker.record_mut(index);
            match record.state() {
                EntityState::Unchanged | EntityState::Detached => {}
                EntityState::Added => detached.push(index),
                EntityState::Modified | EntityState::Deleted => {
                    match self.checkpoint().and_then(|()| record.reload(&self.conn)) {
                        Ok(true) => record.set_state(EntityState::Unchanged),
                        Ok(false) => detached.push(index),
                        Err(err) => {
                            first_error.get_or_insert(err);
                        }
                    }
                }
            }
        }
        tracker.remove_where(|position, _| detached.contains(&position));

        match first_error {
            None => {
                debug!(
                    "event=reject_changes module=session status=ok session_id={} detached={}",
                    self.id,
                    detached.len()
                );
                Ok(())
            }
            Some(err) => {
                warn!(
                    "event=reject_changes module=session status=error session_id={} detached={} error={}",
                    self.id,
                    detached.len(),
                    sanitize_message(&err.to_string(), MAX_LOGGED_ERROR_CHARS)
                );
                Err(err)
            }
        }
    }

    /// Opens an explicit IMMEDIATE transaction.
    ///
    /// # Errors
    /// - `TransactionActive` when one is already open.
    pub fn begin_transaction(&self) -> RepoResult<()> {
        self.checkpoint()?;
        if self.in_transaction() {
            return Err(RepoError::TransactionActive);
        }
        self.conn.execute_batch("BEGIN IMMEDIATE;")?;
        self.transaction_open.set(true);
        debug!(
            "event=transaction_begin module=session status=ok session_id={}",
            self.id
        );
        Ok(())
    }

    pub fn commit(&self) -> RepoResult<()> {
        if !self.in_transaction() {
            return Err(RepoError::NoActiveTransaction);
        }
        self.checkpoint()?;
        self.conn.execute_batch("COMMIT;")?;
        self.transaction_open.set(false);
        Ok(())
    }

    /// Rolls back the explicit transaction. Does not consult the
    /// cancellation token.
    pub fn rollback(&self) -> RepoResult<()> {
        if !self.in_transaction() {
            return Err(RepoError::NoActiveTransaction);
        }
        self.transaction_open.set(false);
        // SQLite may already have rolled back on its own after some errors.
        if self.conn.is_autocommit() {
            return Ok(());
        }
        self.conn.execute_batch("ROLLBACK;")?;
        Ok(())
    }

    /// Runs `work` inside one transaction, then saves and commits.
    ///
    /// Any error from `work`, the save or the commit (and any panic inside
    /// `work`) rolls the transaction back and restores the change tracker
    /// to its state before the call. The error is returned unchanged.
    ///
    /// # Errors
    /// - `TransactionActive` (converted into `E`) when a transaction is
    ///   already open; nothing is rolled back in that case.
    pub fn run_in_transaction<R, E, F>(&self, work: F) -> Result<R, E>
    where
        F: FnOnce() -> Result<R, E>,
        E: From<RepoError> + Display,
    {
        let started_at = Instant::now();
        self.begin_transaction()?;
        let scope = TransactionScope {
            session: self,
            snapshot: Some(self.tracker().clone()),
        };

        let outcome = work().and_then(|value| {
            self.save_changes()?;
            self.commit()?;
            Ok(value)
        });

        match outcome {
            Ok(value) => {
                scope.complete();
                info!(
                    "event=transaction module=session status=ok session_id={} duration_ms={}",
                    self.id,
                    started_at.elapsed().as_millis()
                );
                Ok(value)
            }
            Err(err) => {
                drop(scope);
                error!(
                    "event=transaction module=session status=error session_id={} duration_ms={} error={}",
                    self.id,
                    started_at.elapsed().as_millis(),
                    sanitize_message(&err.to_string(), MAX_LOGGED_ERROR_CHARS)
                );
                Err(err)
            }
        }
    }

    /// Closes the connection, rolling back an open transaction first.
    pub fn close(self) -> RepoResult<()> {
        if self.in_transaction() {
            self.rollback()?;
        }
        let id = self.id;
        let Session { conn, .. } = self;
        conn.close().map_err(|(_, err)| RepoError::from(err))?;
        debug!("event=session_close module=session status=ok session_id={id}");
        Ok(())
    }

    pub(crate) fn checkpoint(&self) -> RepoResult<()> {
        self.cancellation.check()
    }

    pub(crate) fn tracker(&self) -> Ref<'_, ChangeTracker> {
        self.tracker.borrow()
    }

    pub(crate) fn tracker_mut(&self) -> RefMut<'_, ChangeTracker> {
        self.tracker.borrow_mut()
    }

    /// Returns the tracked copy of `entity` when its key is tracked,
    /// otherwise starts tracking it as Unchanged.
    pub(crate) fn identity_resolve<T: Entity>(&self, entity: T) -> T {
        let mut tracker = self.tracker_mut();
        if let Some(tracked) = tracker.get::<T>(&entity.key()) {
            return tracked.entity.clone();
        }
        // Cannot collide: the key was just checked.
        let _ = tracker.track(entity.clone(), EntityState::Unchanged);
        entity
    }

    fn abort_transaction(&self, snapshot: ChangeTracker) {
        if let Err(err) = self.rollback() {
            error!(
                "event=transaction_rollback module=session status=error session_id={} error={}",
                self.id,
                sanitize_message(&err.to_string(), MAX_LOGGED_ERROR_CHARS)
            );
        }
        match self.tracker.try_borrow_mut() {
            Ok(mut tracker) => *tracker = snapshot,
            Err(_) => warn!(
                "event=transaction_rollback module=session status=error session_id={} error_code=tracker_busy",
                self.id
            ),
        }
    }
}

/// Rolls back and restores the tracker unless completed.
struct TransactionScope<'s> {
    session: &'s Session,
    snapshot: Option<ChangeTracker>,
}

impl TransactionScope<'_> {
    fn complete(mut self) {
        self.snapshot = None;
    }
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            self.session.abort_transaction(snapshot);
        }
    }
}
