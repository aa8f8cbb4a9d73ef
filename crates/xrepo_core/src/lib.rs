//! Generic repository and unit-of-work layer over SQLite.
//! Any type implementing `Entity` gets CRUD, ordered and paged reads and
//! transactional saves without per-entity code.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod query;
pub mod repo;
pub mod session;
pub mod unit_of_work;

pub use config::{LoggingOptions, StoreOptions};
pub use db::{DbError, DbResult, Migration};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::entity::{Entity, Field, Relation, RelationKind};
pub use model::value::{uuid_column, FieldValue};
pub use query::accessor::{resolve, Accessor};
pub use query::filter::{CompareOp, Filter, ResolvedFilter};
pub use query::ordering::OrderingTransform;
pub use query::paged::{get_paged, get_paged_with, PageRequest, PageResult};
pub use query::sort::{SortDirection, SortField, SortSpec};
pub use query::source::{MemoryQuery, QuerySource, Tracking};
pub use repo::{ReadOptions, RepoError, RepoResult, Repository};
pub use session::{
    load_one, load_related, CancellationToken, EntitySet, EntityState, Session, SqliteQuery,
    TrackedEntry,
};
pub use unit_of_work::UnitOfWork;

/// Returns the crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
