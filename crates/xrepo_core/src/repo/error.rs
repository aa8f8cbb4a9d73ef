//! Repository error taxonomy.
//!
//! # Invariants
//! - Every fault is surfaced; nothing is retried or swallowed.
//! - Store transport errors stay reachable through `Error::source`.

use crate::db::DbError;
use crate::session::EntityState;
use rusqlite::ErrorCode;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Error for repository, query and unit-of-work operations.
#[derive(Debug)]
pub enum RepoError {
    /// A sort or filter field does not match any declared field.
    PropertyNotFound { entity: &'static str, name: String },
    /// An include path or relation loader names an unknown relation.
    RelationNotFound { entity: &'static str, name: String },
    /// Delete-by-key target does not exist.
    NotFound { entity: &'static str, key: String },
    /// A single-result query matched more than one row.
    MultipleResults { entity: &'static str },
    /// The session already tracks an entity with this key.
    AlreadyTracked { entity: &'static str, key: String },
    /// The change tracker refused a flush or reload for this state.
    InvalidTrackedState {
        entity: &'static str,
        state: EntityState,
        operation: &'static str,
    },
    /// A transaction is already open on this session.
    TransactionActive,
    NoActiveTransaction,
    /// The session's cancellation token fired.
    Cancelled,
    InvalidPageRequest { page: usize, size: usize },
    InvalidBatchSize,
    /// A filter could not be compiled (for example an oversized LIKE pattern).
    InvalidFilter(String),
    Db(DbError),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PropertyNotFound { entity, name } => {
                write!(f, "the name `{name}` does not match any property of {entity}")
            }
            Self::RelationNotFound { entity, name } => {
                write!(f, "the name `{name}` does not match any relation of {entity}")
            }
            Self::NotFound { entity, key } => write!(f, "{entity} not found: {key}"),
            Self::MultipleResults { entity } => {
                write!(f, "query for a single {entity} matched more than one row")
            }
            Self::AlreadyTracked { entity, key } => {
                write!(f, "{entity} with key {key} is already tracked by this session")
            }
            Self::InvalidTrackedState {
                entity,
                state,
                operation,
            } => write!(f, "cannot {operation} {entity} entry in state {state}"),
            Self::TransactionActive => write!(f, "a transaction is already open on this session"),
            Self::NoActiveTransaction => write!(f, "no transaction is open on this session"),
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::InvalidPageRequest { page, size } => write!(
                f,
                "invalid page request page={page} size={size}; both must be at least 1"
            ),
            Self::InvalidBatchSize => write!(f, "batch size must be at least 1"),
            Self::InvalidFilter(message) => write!(f, "invalid filter: {message}"),
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        match &value {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == ErrorCode::OperationInterrupted =>
            {
                Self::Cancelled
            }
            _ => Self::Db(DbError::Sqlite(value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RepoError;
    use rusqlite::ffi;

    #[test]
    fn interrupted_statement_maps_to_cancelled() {
        let err = rusqlite::Error::SqliteFailure(ffi::Error::new(ffi::SQLITE_INTERRUPT), None);
        assert!(matches!(RepoError::from(err), RepoError::Cancelled));
    }

    #[test]
    fn other_sqlite_errors_keep_their_source() {
        let err = RepoError::from(rusqlite::Error::QueryReturnedNoRows);
        assert!(matches!(err, RepoError::Db(_)));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn property_message_names_the_field() {
        let err = RepoError::PropertyNotFound {
            entity: "Item",
            name: "Foo".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "the name `Foo` does not match any property of Item"
        );
    }
}
