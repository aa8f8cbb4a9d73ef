//! Query composition: name resolution, sort specs, filters and paging.
//!
//! # Responsibility
//! - Turn runtime field names and order strings into typed, validated
//!   query operations.
//! - Apply them to any `QuerySource`, store-backed or in-memory.
//!
//! # Invariants
//! - Resolution and parsing are CPU-only and never touch the store.

pub mod accessor;
pub mod filter;
pub mod ordering;
pub mod paged;
pub mod sort;
pub mod source;

/// Quotes an SQL identifier.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
