//! Field-name resolution against entity descriptors.
//!
//! # Responsibility
//! - Resolve a runtime field name to a typed `Accessor<T>`.
//! - Cache resolutions process-wide per `(entity type, name)`.
//!
//! # Invariants
//! - Lookup ignores ASCII case and surrounding whitespace.
//! - Resolution never touches the store; failures happen before any query.
//! - Cache entries are written once per key and never invalidated.

use crate::model::entity::{Entity, Field};
use crate::model::value::FieldValue;
use crate::repo::error::{RepoError, RepoResult};
use once_cell::sync::Lazy;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

type CacheKey = (TypeId, String);

/// Maps a lowercased name to its index in `T::fields()`.
static ACCESSOR_CACHE: Lazy<RwLock<HashMap<CacheKey, usize>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Resolved handle to one readable field of `T`.
pub struct Accessor<T: 'static> {
    field: &'static Field<T>,
}

impl<T: 'static> Accessor<T> {
    pub fn name(&self) -> &'static str {
        self.field.name
    }

    pub fn column(&self) -> &'static str {
        self.field.column
    }

    pub fn value(&self, entity: &T) -> FieldValue {
        (self.field.get)(entity)
    }
}

impl<T: 'static> Clone for Accessor<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: 'static> Copy for Accessor<T> {}

impl<T: 'static> std::fmt::Debug for Accessor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accessor")
            .field("name", &self.field.name)
            .field("column", &self.field.column)
            .finish()
    }
}

/// Resolves `name` against `T::fields()`.
///
/// # Errors
/// - `PropertyNotFound` when no field matches, including empty names.
pub fn resolve<T: Entity>(name: &str) -> RepoResult<Accessor<T>> {
    let normalized = name.trim().to_ascii_lowercase();
    let key = (TypeId::of::<T>(), normalized);
    let fields = T::fields();

    let cached = ACCESSOR_CACHE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&key)
        .copied();
    if let Some(index) = cached {
        return Ok(Accessor {
            field: &fields[index],
        });
    }

    let index = fields
        .iter()
        .position(|field| !key.1.is_empty() && field.name.eq_ignore_ascii_case(&key.1))
        .ok_or_else(|| RepoError::PropertyNotFound {
            entity: T::NAME,
            name: name.to_string(),
        })?;

    ACCESSOR_CACHE
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .entry(key)
        .or_insert(index);

    Ok(Accessor {
        field: &fields[index],
    })
}

/// Resolves the key column of `T`.
pub(crate) fn key_accessor<T: Entity>() -> RepoResult<Accessor<T>> {
    let fields = T::fields();
    fields
        .iter()
        .find(|field| field.column == T::KEY_COLUMN)
        .map(|field| Accessor { field })
        .ok_or_else(|| RepoError::PropertyNotFound {
            entity: T::NAME,
            name: T::KEY_COLUMN.to_string(),
        })
}

#[cfg(test)]
fn is_cached<T: Entity>(name: &str) -> bool {
    ACCESSOR_CACHE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .contains_key(&(TypeId::of::<T>(), name.to_ascii_lowercase()))
}
