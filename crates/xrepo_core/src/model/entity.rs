//! Entity contract consumed by the generic data-access layer.
//!
//! # Responsibility
//! - Describe an entity type's readable fields, key and table mapping.
//! - Describe named relations that can be eager- or lazy-loaded.
//!
//! # Invariants
//! - `fields()` lists every persisted column exactly once, key included.
//! - Field names are unique ignoring ASCII case.
//! - `key()` returns the value stored in the `KEY_COLUMN` column.

use crate::model::value::FieldValue;
use rusqlite::{Connection, Row};

/// A type the repository layer can store, query, order and track.
///
/// Implementors declare their shape once; name lookups, SQL rendering and
/// change tracking are derived from these descriptors.
pub trait Entity: Clone + 'static {
    /// Display name used in errors and log events.
    const NAME: &'static str;
    /// Backing table.
    const TABLE: &'static str;
    /// Primary key column. Must appear in `fields()`.
    const KEY_COLUMN: &'static str;

    /// Public readable fields, in column order.
    fn fields() -> &'static [Field<Self>];

    /// Primary key of this instance.
    fn key(&self) -> FieldValue;

    /// Builds an entity from a row selected with every column of `fields()`.
    ///
    /// Relation-backed members start empty; they are filled by `include`
    /// or the explicit relation loaders.
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;

    /// Named relations. Entities without navigation members keep the default.
    fn relations() -> &'static [Relation<Self>] {
        &[]
    }
}

/// Readable field descriptor.
pub struct Field<T> {
    pub name: &'static str,
    pub column: &'static str,
    pub get: fn(&T) -> FieldValue,
}

impl<T> Field<T> {
    pub const fn new(name: &'static str, column: &'static str, get: fn(&T) -> FieldValue) -> Self {
        Self { name, column, get }
    }
}

impl<T> Clone for Field<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Field<T> {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// Zero or more dependent rows.
    Collection,
    /// At most one principal row.
    Reference,
}

/// Function that fills one relation member of an already-materialized entity.
pub type RelationLoader<T> = fn(&Connection, &mut T) -> rusqlite::Result<()>;

/// Named relation descriptor.
pub struct Relation<T> {
    pub name: &'static str,
    pub kind: RelationKind,
    pub load: RelationLoader<T>,
}

impl<T> Relation<T> {
    pub const fn collection(name: &'static str, load: RelationLoader<T>) -> Self {
        Self {
            name,
            kind: RelationKind::Collection,
            load,
        }
    }

    pub const fn reference(name: &'static str, load: RelationLoader<T>) -> Self {
        Self {
            name,
            kind: RelationKind::Reference,
            load,
        }
    }
}

impl<T> Clone for Relation<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Relation<T> {}

/// Looks up a relation by name, ignoring ASCII case.
pub fn find_relation<T: Entity>(name: &str) -> Option<&'static Relation<T>> {
    let wanted = name.trim();
    T::relations()
        .iter()
        .find(|relation| relation.name.eq_ignore_ascii_case(wanted))
}
