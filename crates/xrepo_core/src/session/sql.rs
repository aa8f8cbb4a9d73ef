//! Statement rendering and row mapping driven by entity descriptors.
//!
//! # Invariants
//! - Identifiers are always quoted; values always travel as parameters.
//! - SELECT lists name every column of `Entity::fields()` so `from_row`
//!   can read by column name.

use crate::model::entity::Entity;
use crate::model::value::FieldValue;
use crate::query::quote_ident;
use rusqlite::{params_from_iter, Connection, OptionalExtension};

pub(crate) fn column_list<T: Entity>() -> String {
    T::fields()
        .iter()
        .map(|field| quote_ident(field.column))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn select_sql<T: Entity>() -> String {
    format!(
        "SELECT {} FROM {}",
        column_list::<T>(),
        quote_ident(T::TABLE)
    )
}

pub(crate) fn insert<T: Entity>(conn: &Connection, entity: &T) -> rusqlite::Result<usize> {
    let fields = T::fields();
    let placeholders = vec!["?"; fields.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(T::TABLE),
        column_list::<T>(),
        placeholders
    );
    let values: Vec<FieldValue> = fields.iter().map(|field| (field.get)(entity)).collect();
    conn.prepare_cached(&sql)?
        .execute(params_from_iter(values.iter()))
}

/// Writes every non-key column. Returns the number of matched rows.
pub(crate) fn update<T: Entity>(conn: &Connection, entity: &T) -> rusqlite::Result<usize> {
    let columns: Vec<_> = T::fields()
        .iter()
        .filter(|field| field.column != T::KEY_COLUMN)
        .collect();
    if columns.is_empty() {
        return exists_by_key::<T>(conn, &entity.key()).map(usize::from);
    }

    let assignments = columns
        .iter()
        .map(|field| format!("{} = ?", quote_ident(field.column)))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ?",
        quote_ident(T::TABLE),
        assignments,
        quote_ident(T::KEY_COLUMN)
    );
    let mut values: Vec<FieldValue> = columns.iter().map(|field| (field.get)(entity)).collect();
    values.push(entity.key());
    conn.prepare_cached(&sql)?
        .execute(params_from_iter(values.iter()))
}

pub(crate) fn delete_by_key<T: Entity>(
    conn: &Connection,
    key: &FieldValue,
) -> rusqlite::Result<usize> {
    let sql = format!(
        "DELETE FROM {} WHERE {} = ?1",
        quote_ident(T::TABLE),
        quote_ident(T::KEY_COLUMN)
    );
    conn.prepare_cached(&sql)?.execute([key])
}

pub(crate) fn fetch_by_key<T: Entity>(
    conn: &Connection,
    key: &FieldValue,
) -> rusqlite::Result<Option<T>> {
    load_one::<T>(conn, T::KEY_COLUMN, key)
}

pub(crate) fn exists_by_key<T: Entity>(
    conn: &Connection,
    key: &FieldValue,
) -> rusqlite::Result<bool> {
    let sql = format!(
        "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = ?1)",
        quote_ident(T::TABLE),
        quote_ident(T::KEY_COLUMN)
    );
    conn.prepare_cached(&sql)?.query_row([key], |row| row.get(0))
}

/// Loads every `C` whose `column` equals `value`, in key order.
///
/// Intended for collection relation loaders.
pub fn load_related<C: Entity>(
    conn: &Connection,
    column: &str,
    value: &FieldValue,
) -> rusqlite::Result<Vec<C>> {
    let sql = format!(
        "{} WHERE {} = ?1 ORDER BY {} ASC",
        select_sql::<C>(),
        quote_ident(column),
        quote_ident(C::KEY_COLUMN)
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map([value], |row| C::from_row(row))?;
    rows.collect()
}

/// Loads the first `C` whose `column` equals `value`.
///
/// Intended for reference relation loaders.
pub fn load_one<C: Entity>(
    conn: &Connection,
    column: &str,
    value: &FieldValue,
) -> rusqlite::Result<Option<C>> {
    let sql = format!(
        "{} WHERE {} = ?1 LIMIT 1",
        select_sql::<C>(),
        quote_ident(column)
    );
    conn.prepare_cached(&sql)?
        .query_row([value], |row| C::from_row(row))
        .optional()
}
