//! Repository layer over sessions.
//!
//! # Responsibility
//! - Expose the generic per-entity repository and its error type.
//! - Keep SQL inside the session; repositories speak filters and sort strings.

pub mod error;
pub mod repository;

pub use error::{RepoError, RepoResult};
pub use repository::{ReadOptions, Repository};
