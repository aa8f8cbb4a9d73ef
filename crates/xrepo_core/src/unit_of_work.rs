//! Unit of work spanning every repository of one session.
//!
//! # Responsibility
//! - Own the session and hand out repositories that share it.
//! - Save, reject and transaction-scope changes across entity types.
//!
//! # Invariants
//! - Repositories borrow the unit of work, so `dispose` cannot run while
//!   any of them is alive.

use crate::config::StoreOptions;
use crate::db::Migration;
use crate::model::entity::Entity;
use crate::repo::error::{RepoError, RepoResult};
use crate::repo::repository::Repository;
use crate::session::{CancellationToken, Session, TrackedEntry};
use std::fmt::Display;
use std::path::Path;

pub struct UnitOfWork {
    session: Session,
}

impl UnitOfWork {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub fn open(
        path: impl AsRef<Path>,
        options: StoreOptions,
        migrations: &[Migration],
    ) -> RepoResult<Self> {
        Session::open(path, options, migrations).map(Self::new)
    }

    pub fn open_in_memory(options: StoreOptions, migrations: &[Migration]) -> RepoResult<Self> {
        Session::open_in_memory(options, migrations).map(Self::new)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn repository<T: Entity>(&self) -> Repository<'_, T> {
        Repository::new(&self.session)
    }

    /// Flushes pending changes of every entity type in staging order.
    pub fn save_changes(&self) -> RepoResult<usize> {
        self.session.save_changes()
    }

    /// Discards pending changes; see `Session::reject_changes`.
    pub fn reject_changes(&self) -> RepoResult<()> {
        self.session.reject_changes()
    }

    /// Runs `work` in one transaction; see `Session::run_in_transaction`.
    pub fn run_in_transaction<R, E, F>(&self, work: F) -> Result<R, E>
    where
        F: FnOnce() -> Result<R, E>,
        E: From<RepoError> + Display,
    {
        self.session.run_in_transaction(work)
    }

    pub fn entries(&self) -> Vec<TrackedEntry> {
        self.session.entries()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.session.cancellation_token()
    }

    /// Releases the connection. Pending changes are discarded.
    pub fn dispose(self) -> RepoResult<()> {
        self.session.close()
    }
}
